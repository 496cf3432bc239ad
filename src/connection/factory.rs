//! Connection factory: protocol name to constructor.
//!
//! Transports are registered explicitly. [`ConnectionFactory::with_builtin`]
//! knows `local` and `winrm`; further transports are added with
//! [`ConnectionFactory::register`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::local::{LocalConnection, LOCAL_PROTOCOL};
use super::winrm::{WinRmConnection, WINRM_PROTOCOL};
use super::Connection;
use crate::error::{Error, Result};
use crate::options::ConnectionOptions;

/// Builds a connection from options.
pub type ConnectionConstructor =
    Box<dyn Fn(&ConnectionOptions) -> Result<Arc<dyn Connection>> + Send + Sync>;

/// Registry of transports by protocol name.
pub struct ConnectionFactory {
    constructors: HashMap<String, ConnectionConstructor>,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory {
    /// Create an empty factory
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Create a factory with the built-in transports
    pub fn with_builtin() -> Self {
        let mut factory = Self::new();
        factory.register(LOCAL_PROTOCOL, |options| {
            Ok(Arc::new(LocalConnection::new(options)?) as Arc<dyn Connection>)
        });
        factory.register(WINRM_PROTOCOL, |options| {
            Ok(Arc::new(WinRmConnection::new(options)?) as Arc<dyn Connection>)
        });
        factory
    }

    /// Register a constructor, replacing any previous one for `protocol`
    pub fn register<F>(&mut self, protocol: &str, constructor: F)
    where
        F: Fn(&ConnectionOptions) -> Result<Arc<dyn Connection>> + Send + Sync + 'static,
    {
        self.constructors
            .insert(protocol.to_lowercase(), Box::new(constructor));
    }

    /// Open a connection for `protocol`
    pub fn connect(&self, protocol: &str, options: &ConnectionOptions) -> Result<Arc<dyn Connection>> {
        let constructor = self
            .constructors
            .get(&protocol.to_lowercase())
            .ok_or_else(|| Error::UnknownProtocol(protocol.to_string()))?;
        let connection = constructor(options)?;
        debug!(protocol = %protocol, connection = %connection.identifier(), "Opened connection");
        Ok(connection)
    }

    /// Check if a protocol is registered
    pub fn is_registered(&self, protocol: &str) -> bool {
        self.constructors.contains_key(&protocol.to_lowercase())
    }

    /// Registered protocol names, sorted
    pub fn protocols(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ConnectionFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionFactory")
            .field("protocols", &self.protocols())
            .finish()
    }
}
