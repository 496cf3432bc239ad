//! Connection layer for host communication.
//!
//! This module provides a uniform interface for running commands and managing
//! temporary files on a host, whatever the transport underneath.
//!
//! # Overview
//!
//! Every transport implements the [`Connection`] trait. A transport supplies
//! the primitives (start a process, check/create/delete a path, disconnect);
//! the trait supplies everything built on top of them:
//!
//! - unique temporary file names inside a lazily created, connection-scoped
//!   temporary directory that is removed again on [`Connection::close`]
//! - [`Connection::execute`], which pumps stdout and stderr into
//!   [`OutputHandler`]s while waiting for the process
//!
//! # Supported Transports
//!
//! - **Local**: Direct execution on this host
//! - **WinRM**: WS-Management remote shell over HTTP(S)
//!
//! # Example
//!
//! ```rust,ignore
//! use hostsession::prelude::*;
//!
//! let options = ConnectionOptions::new()
//!     .with("os", "WINDOWS")
//!     .with("address", "winbox.example.com")
//!     .with("username", "Administrator")
//!     .with("password", "secret");
//!
//! let conn = ConnectionFactory::with_builtin().connect("winrm", &options)?;
//! let result = conn.execute_capturing(&CmdLine::build(["ipconfig", "/all"])).await?;
//! println!("{}", result.stdout);
//! conn.close().await?;
//! ```

/// Generic execute implementation.
mod execute;

/// Protocol name to constructor registry.
pub mod factory;

/// Local execution connection implementation.
pub mod local;

/// Windows Remote Management connection implementation.
pub mod winrm;

use async_trait::async_trait;
use chrono::Local;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cmdline::CmdLine;
use crate::error::{Error, Result};
use crate::handler::{CapturingHandler, OutputHandler};
use crate::options::{keys, ConnectionOptions};
use crate::os::OperatingSystemFamily;
use crate::path::HostPath;
use crate::process::Process;

pub use factory::{ConnectionConstructor, ConnectionFactory};
pub use local::LocalConnection;
pub use winrm::WinRmConnection;

/// Name prefix of connection-scoped temporary directories.
pub const TEMP_DIRECTORY_PREFIX: &str = "overthere-";

/// Prefix used when a temp file template is blank.
pub const DEFAULT_TEMP_FILE_PREFIX: &str = "hostsession";

/// Suffix used when a temp file template is blank.
pub const DEFAULT_TEMP_FILE_SUFFIX: &str = ".tmp";

const TEMP_DIRECTORY_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3f";

/// The result of executing a command on a connection.
///
/// Contains the exit code, stdout, stderr, and a convenience boolean
/// indicating whether the command succeeded (exit code 0).
///
/// # Example
///
/// ```rust
/// use hostsession::connection::CommandResult;
///
/// let result = CommandResult::new(0, "Hello".into(), String::new());
/// assert!(result.success);
///
/// let failed = CommandResult::new(1, String::new(), "error".into());
/// assert!(!failed.success);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Lines written to standard output, joined with `\n`.
    pub stdout: String,
    /// Lines written to standard error, joined with `\n`.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a result from an exit code and captured output.
    pub fn new(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: exit_code == 0,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// State every transport shares: identity, target OS and temp-file settings.
///
/// Built once from the [`ConnectionOptions`] and owned by the transport,
/// which exposes it through [`Connection::base`].
#[derive(Debug)]
pub struct BaseConnection {
    protocol: String,
    identifier: String,
    options: ConnectionOptions,
    os: OperatingSystemFamily,
    connection_timeout: Duration,
    temporary_directory_path: String,
    delete_temporary_directory_on_disconnect: bool,
    temporary_file_creation_retries: u32,
    can_start_process: bool,
    connection_temp_dir: AsyncMutex<Option<HostPath>>,
    working_directory: RwLock<Option<HostPath>>,
}

impl BaseConnection {
    /// Read the shared settings from `options`.
    ///
    /// `default_os` is used when the `os` option is absent; remote transports
    /// pass `None` to make the option mandatory.
    pub fn new(
        protocol: impl Into<String>,
        options: &ConnectionOptions,
        default_os: Option<OperatingSystemFamily>,
    ) -> Result<Self> {
        let protocol = protocol.into();
        let os = match options.get_parsed::<OperatingSystemFamily>(keys::OPERATING_SYSTEM)? {
            Some(os) => os,
            None => default_os.ok_or_else(|| {
                Error::invalid_option(keys::OPERATING_SYSTEM, "option is required")
            })?,
        };

        let timeout_millis = options.get_parsed_or(
            keys::CONNECTION_TIMEOUT_MILLIS,
            crate::options::DEFAULT_CONNECTION_TIMEOUT_MILLIS,
        )?;
        let temporary_directory_path = options
            .get_or(
                keys::TEMPORARY_DIRECTORY_PATH,
                os.default_temporary_directory_path(),
            )
            .to_string();
        let delete_temporary_directory_on_disconnect =
            options.get_bool_or(keys::TEMPORARY_DIRECTORY_DELETE_ON_DISCONNECT, true)?;
        let temporary_file_creation_retries = options.get_parsed_or(
            keys::TEMPORARY_FILE_CREATION_RETRIES,
            crate::options::DEFAULT_TEMPORARY_FILE_CREATION_RETRIES,
        )?;
        if temporary_file_creation_retries == 0 {
            return Err(Error::invalid_option(
                keys::TEMPORARY_FILE_CREATION_RETRIES,
                "must be at least 1",
            ));
        }

        Ok(Self {
            identifier: protocol.clone(),
            protocol,
            options: options.clone(),
            os,
            connection_timeout: Duration::from_millis(timeout_millis),
            temporary_directory_path,
            delete_temporary_directory_on_disconnect,
            temporary_file_creation_retries,
            can_start_process: true,
            connection_temp_dir: AsyncMutex::new(None),
            working_directory: RwLock::new(None),
        })
    }

    /// Set the human readable identifier used in logs.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    /// Declare whether the transport can start processes.
    pub fn with_process_support(mut self, can_start_process: bool) -> Self {
        self.can_start_process = can_start_process;
        self
    }

    /// Protocol name.
    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    /// Identifier used in logs, e.g. `winrm://host:5985`.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Options the connection was created with.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Target OS family.
    pub fn os(&self) -> OperatingSystemFamily {
        self.os
    }

    /// Connect timeout.
    pub fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    /// Root under which the connection temp directory is created.
    pub fn temporary_directory_path(&self) -> &str {
        &self.temporary_directory_path
    }

    /// Whether `close` removes the connection temp directory.
    pub fn delete_temporary_directory_on_disconnect(&self) -> bool {
        self.delete_temporary_directory_on_disconnect
    }

    /// Attempts made to find an unused temporary name.
    pub fn temporary_file_creation_retries(&self) -> u32 {
        self.temporary_file_creation_retries
    }

    /// Whether the transport can start processes.
    pub fn can_start_process(&self) -> bool {
        self.can_start_process
    }

    /// Fail with `UnsupportedOperation` if processes cannot be started.
    pub fn check_can_start_process(&self) -> Result<()> {
        if self.can_start_process {
            Ok(())
        } else {
            Err(Error::UnsupportedOperation(format!(
                "Cannot start a process on {}",
                self.identifier
            )))
        }
    }
}

/// Split a temp file template into prefix and suffix.
///
/// Any directory part is dropped, whether it was written with `/` or `\`.
/// A blank template yields the defaults.
pub fn split_name_template(template: Option<&str>) -> (String, String) {
    let name = template
        .map(|t| t.rsplit(['/', '\\']).next().unwrap_or(t))
        .unwrap_or("");
    if name.trim().is_empty() {
        return (
            DEFAULT_TEMP_FILE_PREFIX.to_string(),
            DEFAULT_TEMP_FILE_SUFFIX.to_string(),
        );
    }
    match name.rfind('.') {
        Some(dot) if dot > 0 => (name[..dot].to_string(), name[dot..].to_string()),
        _ => (name.to_string(), String::new()),
    }
}

/// Candidate name for attempt number `attempt` (1-based).
fn candidate_name(prefix: &str, suffix: &str, attempt: u32) -> String {
    if attempt <= 1 {
        format!("{}{}", prefix, suffix)
    } else {
        let infix = rand::random::<u64>() >> 1;
        format!("{}-{}{}", prefix, infix, suffix)
    }
}

/// The connection trait that all transport implementations must implement.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Shared connection state.
    fn base(&self) -> &BaseConnection;

    /// Start `cmd_line` on the host.
    async fn start_process(&self, cmd_line: &CmdLine) -> Result<Box<dyn Process>>;

    /// Whether `path` exists on the host.
    async fn exists(&self, path: &HostPath) -> Result<bool>;

    /// Create the directory `path`; its parent must exist.
    async fn mkdir(&self, path: &HostPath) -> Result<()>;

    /// Delete `path` and, for a directory, everything below it.
    async fn delete_recursively(&self, path: &HostPath) -> Result<()>;

    /// Release transport resources. Called by [`Connection::close`].
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    /// Protocol name.
    fn protocol(&self) -> &str {
        self.base().protocol()
    }

    /// Identifier used in logs.
    fn identifier(&self) -> &str {
        self.base().identifier()
    }

    /// Target OS family.
    fn os(&self) -> OperatingSystemFamily {
        self.base().os()
    }

    /// Options the connection was created with.
    fn options(&self) -> &ConnectionOptions {
        self.base().options()
    }

    /// Whether the transport can start processes.
    fn can_start_process(&self) -> bool {
        self.base().can_start_process()
    }

    /// Directory commands are started in, if set.
    fn working_directory(&self) -> Option<HostPath> {
        self.base().working_directory.read().clone()
    }

    /// Change the directory subsequent commands are started in.
    fn set_working_directory(&self, directory: Option<HostPath>) {
        *self.base().working_directory.write() = directory;
    }

    /// A path on this connection's host.
    fn file(&self, path: &str) -> HostPath {
        HostPath::new(path, self.os())
    }

    /// A fresh temporary path named after `name_template`.
    ///
    /// Nothing is created; the path merely did not exist when checked.
    async fn get_temp_file(&self, name_template: Option<&str>) -> Result<HostPath> {
        let (prefix, suffix) = split_name_template(name_template);
        self.get_temp_file_with(&prefix, &suffix).await
    }

    /// A fresh temporary path `prefix[-N]suffix` in the connection temp directory.
    async fn get_temp_file_with(&self, prefix: &str, suffix: &str) -> Result<HostPath> {
        let parent = self.connection_temp_dir().await?;
        let attempts = self.base().temporary_file_creation_retries();

        for attempt in 1..=attempts {
            let candidate = parent.child(&candidate_name(prefix, suffix, attempt));
            trace!(candidate = %candidate, attempt, "Probing temporary file name");
            if !self.exists(&candidate).await? {
                debug!(path = %candidate, "Generated temporary file name");
                return Ok(candidate);
            }
        }

        Err(Error::TempNameExhausted {
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            attempts,
        })
    }

    /// The connection-scoped temporary directory, created on first use.
    async fn connection_temp_dir(&self) -> Result<HostPath> {
        let base = self.base();
        let mut slot = base.connection_temp_dir.lock().await;
        if let Some(dir) = slot.as_ref() {
            return Ok(dir.clone());
        }

        let root = HostPath::new(base.temporary_directory_path(), base.os());
        let name = format!(
            "{}{}",
            TEMP_DIRECTORY_PREFIX,
            Local::now().format(TEMP_DIRECTORY_TIMESTAMP_FORMAT)
        );
        let attempts = base.temporary_file_creation_retries();

        for attempt in 1..=attempts {
            let candidate = root.child(&candidate_name(&name, "", attempt));
            if !self.exists(&candidate).await? {
                self.mkdir(&candidate).await?;
                info!(
                    connection = %base.identifier(),
                    path = %candidate,
                    "Created connection temporary directory"
                );
                *slot = Some(candidate.clone());
                return Ok(candidate);
            }
        }

        Err(Error::TempNameExhausted {
            prefix: name,
            suffix: String::new(),
            attempts,
        })
    }

    /// Run `cmd_line`, feeding its output to the handlers, and return the exit code.
    ///
    /// Stdin is closed immediately. Both pump tasks are finished before this
    /// returns, whatever the outcome.
    async fn execute(
        &self,
        stdout_handler: Arc<dyn OutputHandler>,
        stderr_handler: Arc<dyn OutputHandler>,
        cmd_line: &CmdLine,
    ) -> Result<i32> {
        self.execute_with_cancellation(
            stdout_handler,
            stderr_handler,
            cmd_line,
            CancellationToken::new(),
        )
        .await
    }

    /// Like [`Connection::execute`], but gives up when `cancel` fires.
    ///
    /// On cancellation the process is destroyed and
    /// [`Error::Interrupted`] is returned.
    async fn execute_with_cancellation(
        &self,
        stdout_handler: Arc<dyn OutputHandler>,
        stderr_handler: Arc<dyn OutputHandler>,
        cmd_line: &CmdLine,
        cancel: CancellationToken,
    ) -> Result<i32> {
        self.base().check_can_start_process()?;
        let loggable = cmd_line.to_command_line(self.os(), true)?;
        info!(connection = %self.identifier(), command = %loggable, "Starting command");
        let process = self.start_process(cmd_line).await?;
        execute::drive(process, stdout_handler, stderr_handler, cancel).await
    }

    /// Run `cmd_line` and capture its output.
    async fn execute_capturing(&self, cmd_line: &CmdLine) -> Result<CommandResult> {
        let stdout = Arc::new(CapturingHandler::new());
        let stderr = Arc::new(CapturingHandler::new());
        let exit_code = self
            .execute(stdout.clone(), stderr.clone(), cmd_line)
            .await?;
        Ok(CommandResult::new(exit_code, stdout.output(), stderr.output()))
    }

    /// Remove the connection temp directory if configured, then disconnect.
    ///
    /// A failure to remove the temp directory is logged, not returned.
    async fn close(&self) -> Result<()> {
        let base = self.base();
        let temp_dir = base.connection_temp_dir.lock().await.take();
        if let Some(dir) = temp_dir {
            if base.delete_temporary_directory_on_disconnect() {
                match self.delete_recursively(&dir).await {
                    Ok(()) => debug!(path = %dir, "Removed connection temporary directory"),
                    Err(e) => warn!(
                        path = %dir,
                        error = %e,
                        "Failed to remove connection temporary directory"
                    ),
                }
            }
        }

        let result = self.disconnect().await;
        info!(connection = %base.identifier(), "Disconnected");
        result
    }
}
