//! Connection options.
//!
//! Options are a flat string-to-string map so that every transport can read
//! its own keys without the others knowing about them. Typed accessors parse
//! on demand and report the offending key on failure.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Well-known option keys.
pub mod keys {
    /// Operating system family of the target (`WINDOWS`, `UNIX`, `ZOS`).
    pub const OPERATING_SYSTEM: &str = "os";
    /// Connect timeout in milliseconds.
    pub const CONNECTION_TIMEOUT_MILLIS: &str = "connectionTimeoutMillis";
    /// Root directory for temporary files on the target.
    pub const TEMPORARY_DIRECTORY_PATH: &str = "tmp";
    /// Remove the connection temp directory on close.
    pub const TEMPORARY_DIRECTORY_DELETE_ON_DISCONNECT: &str = "tmpDeleteOnDisconnect";
    /// Attempts made to find an unused temporary name.
    pub const TEMPORARY_FILE_CREATION_RETRIES: &str = "tmpFileCreationRetries";
    /// Host name or address of the target.
    pub const ADDRESS: &str = "address";
    /// Port of the target service.
    pub const PORT: &str = "port";
    /// Login name.
    pub const USERNAME: &str = "username";
    /// Login password.
    pub const PASSWORD: &str = "password";
    /// Proxy URL the transport is routed through.
    pub const JUMPSTATION: &str = "jumpstation";

    /// Use HTTPS for WinRM.
    pub const WINRM_ENABLE_HTTPS: &str = "winrmEnableHttps";
    /// WinRM endpoint path.
    pub const WINRM_CONTEXT: &str = "winrmContext";
    /// `MaxEnvelopeSize` header value.
    pub const WINRM_ENVELOP_SIZE: &str = "winrmEnvelopSize";
    /// `Locale` header value.
    pub const WINRM_LOCALE: &str = "winrmLocale";
    /// `OperationTimeout` header value.
    pub const WINRM_TIMEOUT: &str = "winrmTimeout";
    /// Code page of the remote shell.
    pub const WINRM_CODEPAGE: &str = "winrmCodepage";
    /// HTTP request timeout in milliseconds, `0` for none.
    pub const WINRM_SO_TIMEOUT_MILLIS: &str = "winrmSoTimeoutMillis";
    /// Server certificate trust strategy.
    pub const WINRM_HTTPS_CERTIFICATE_TRUST_STRATEGY: &str = "winrmHttpsCertificateTrustStrategy";
    /// Server hostname verification strategy.
    pub const WINRM_HTTPS_HOSTNAME_VERIFICATION_STRATEGY: &str =
        "winrmHttpsHostnameVerificationStrategy";
    /// Use `HTTP` instead of `WSMAN` as the Kerberos service class.
    pub const WINRM_KERBEROS_USE_HTTP_SPN: &str = "winrmKerberosUseHttpSpn";
    /// Append the port to the Kerberos service principal name.
    pub const WINRM_KERBEROS_ADD_PORT_TO_SPN: &str = "winrmKerberosAddPortToSpn";
}

/// Default connect timeout in milliseconds.
pub const DEFAULT_CONNECTION_TIMEOUT_MILLIS: u64 = 120_000;

/// Default number of temporary name attempts.
pub const DEFAULT_TEMPORARY_FILE_CREATION_RETRIES: u32 = 100;

/// String-keyed connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionOptions {
    values: HashMap<String, String>,
}

impl ConnectionOptions {
    /// Create an empty option set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a TOML table of scalar values.
    ///
    /// ```rust
    /// use hostsession::options::ConnectionOptions;
    ///
    /// let options = ConnectionOptions::from_toml_str(r#"
    ///     os = "WINDOWS"
    ///     address = "winbox"
    ///     port = 5985
    ///     winrmEnableHttps = false
    /// "#).unwrap();
    /// assert_eq!(options.get("port"), Some("5985"));
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let table: toml::Table = source
            .parse()
            .map_err(|e: toml::de::Error| Error::invalid_option("<toml>", e.to_string()))?;

        let mut options = ConnectionOptions::new();
        for (key, value) in table {
            let text = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(Error::invalid_option(
                        key,
                        format!("expected a scalar value, found {}", other.type_str()),
                    ))
                }
            };
            options.values.insert(key, text);
        }
        Ok(options)
    }

    /// Read options from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Builder-style setter.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// Set a value, replacing any previous one.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.values.insert(key.into(), value.to_string());
    }

    /// Raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Raw value of `key`, or `default`.
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Value of a key that must be present.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| Error::invalid_option(key, "option is required"))
    }

    /// Parsed value of `key`, `None` when absent.
    pub fn get_parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| Error::invalid_option(key, format!("cannot parse '{}': {}", raw, e))),
        }
    }

    /// Parsed value of `key`, or `default` when absent.
    pub fn get_parsed_or<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        Ok(self.get_parsed(key)?.unwrap_or(default))
    }

    /// Boolean value of `key`; accepts `true`/`false`/`yes`/`no`/`1`/`0`.
    pub fn get_bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(true),
                "false" | "no" | "0" => Ok(false),
                _ => Err(Error::invalid_option(
                    key,
                    format!("expected a boolean, found '{}'", raw),
                )),
            },
        }
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for ConnectionOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = ConnectionOptions::new();
        for (key, value) in iter {
            options.set(key, value);
        }
        options
    }
}
