//! Windows Remote Management (WinRM) connection module
//!
//! This module runs commands on Windows hosts through the WS-Management
//! remote shell (`cmd`) over HTTP or HTTPS.
//!
//! # Overview
//!
//! - [`soap`]: request envelopes and response scanning
//! - [`transport`]: the pooled HTTP client, HTTPS strategies, Basic and
//!   Kerberos (SPNEGO) authentication
//! - [`client`]: the shell lifecycle (create, command, receive, send,
//!   signal, delete)
//! - [`process`]: pumps that present a running command as ordinary pipes
//!
//! Every started process gets its own shell; all shells of a connection share
//! one HTTP client.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostsession::prelude::*;
//!
//! let options = ConnectionOptions::new()
//!     .with("os", "WINDOWS")
//!     .with("address", "winbox.example.com")
//!     .with("username", "admin@corp.example.com")
//!     .with("password", "secret")
//!     .with("winrmEnableHttps", true);
//!
//! let conn = WinRmConnection::new(&options)?;
//! let result = conn.execute_capturing(&CmdLine::build(["dir", "C:\\"])).await?;
//! println!("{}", result.stdout);
//! ```
//!
//! # Security Considerations
//!
//! - Use HTTPS (port 5986) outside of isolated networks
//! - `SELFSIGNED`/`ALLOW_ALL` strategies disable certificate validation

pub mod client;
pub mod process;
pub mod soap;
pub mod transport;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{BaseConnection, Connection};
use crate::cmdline::CmdLine;
use crate::error::{Error, Result};
use crate::options::{keys, ConnectionOptions};
use crate::os::OperatingSystemFamily;
use crate::path::HostPath;
use crate::process::Process;

pub use client::WinRmClient;
pub use process::WinRmProcess;
pub use transport::{
    CertificateTrustStrategy, HostnameVerificationStrategy, KerberosCredentials,
    SpnegoTokenProvider, WinRmTransport,
};

/// Protocol name of the WinRM transport.
pub const WINRM_PROTOCOL: &str = "winrm";

/// Default WinRM HTTP port
pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// Default WinRM HTTPS port
pub const DEFAULT_WINRM_SSL_PORT: u16 = 5986;

/// Default endpoint path
pub const DEFAULT_WINRM_CONTEXT: &str = "/wsman";

/// Default `MaxEnvelopeSize`
pub const DEFAULT_ENVELOPE_SIZE: u32 = 153_600;

/// Default `Locale`
pub const DEFAULT_LOCALE: &str = "en-US";

/// Default `OperationTimeout`
pub const DEFAULT_OPERATION_TIMEOUT: &str = "PT60.000S";

/// Default console code page of the remote shell
pub const DEFAULT_CODEPAGE: u32 = 437;

// ============================================================================
// WinRM Configuration
// ============================================================================

/// WinRM connection configuration
#[derive(Clone)]
pub struct WinRmConfig {
    /// Target hostname or IP address
    pub address: String,
    /// WinRM port
    pub port: u16,
    /// Use HTTPS instead of HTTP
    pub https: bool,
    /// Endpoint path, starting with `/`
    pub context: String,
    /// Username; a `user@realm` name enables Kerberos
    pub username: String,
    /// Password
    pub password: Option<String>,
    /// Maximum envelope size
    pub envelope_size: u32,
    /// Locale of messages returned by the server
    pub locale: String,
    /// Operation timeout as an ISO-8601 duration
    pub timeout: String,
    /// Code page of the remote console
    pub codepage: u32,
    /// TCP connect timeout
    pub connection_timeout: Duration,
    /// Request timeout, `None` to wait indefinitely
    pub so_timeout: Option<Duration>,
    /// Which HTTPS certificates are trusted
    pub certificate_trust: CertificateTrustStrategy,
    /// How HTTPS hostnames are verified
    pub hostname_verification: HostnameVerificationStrategy,
    /// Use `HTTP` instead of `WSMAN` as the SPN service class
    pub kerberos_use_http_spn: bool,
    /// Append the port to the SPN
    pub kerberos_add_port_to_spn: bool,
    /// Proxy URL requests are routed through
    pub jumpstation: Option<String>,
}

impl fmt::Debug for WinRmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinRmConfig")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("https", &self.https)
            .field("context", &self.context)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("envelope_size", &self.envelope_size)
            .field("locale", &self.locale)
            .field("timeout", &self.timeout)
            .field("codepage", &self.codepage)
            .field("certificate_trust", &self.certificate_trust)
            .field("hostname_verification", &self.hostname_verification)
            .field("jumpstation", &self.jumpstation)
            .finish()
    }
}

impl WinRmConfig {
    /// Create a config with defaults for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port: DEFAULT_WINRM_PORT,
            https: false,
            context: DEFAULT_WINRM_CONTEXT.to_string(),
            username: String::new(),
            password: None,
            envelope_size: DEFAULT_ENVELOPE_SIZE,
            locale: DEFAULT_LOCALE.to_string(),
            timeout: DEFAULT_OPERATION_TIMEOUT.to_string(),
            codepage: DEFAULT_CODEPAGE,
            connection_timeout: Duration::from_millis(
                crate::options::DEFAULT_CONNECTION_TIMEOUT_MILLIS,
            ),
            so_timeout: None,
            certificate_trust: CertificateTrustStrategy::default(),
            hostname_verification: HostnameVerificationStrategy::default(),
            kerberos_use_http_spn: false,
            kerberos_add_port_to_spn: false,
            jumpstation: None,
        }
    }

    /// Read the config from connection options.
    pub fn from_options(options: &ConnectionOptions, connection_timeout: Duration) -> Result<Self> {
        let https = options.get_bool_or(keys::WINRM_ENABLE_HTTPS, false)?;
        let default_port = if https {
            DEFAULT_WINRM_SSL_PORT
        } else {
            DEFAULT_WINRM_PORT
        };

        let mut context = options
            .get_or(keys::WINRM_CONTEXT, DEFAULT_WINRM_CONTEXT)
            .to_string();
        if !context.starts_with('/') {
            context.insert(0, '/');
        }

        let so_timeout_millis: u64 = options.get_parsed_or(keys::WINRM_SO_TIMEOUT_MILLIS, 0)?;

        Ok(Self {
            address: options.require(keys::ADDRESS)?.to_string(),
            port: options.get_parsed_or(keys::PORT, default_port)?,
            https,
            context,
            username: options.get_or(keys::USERNAME, "").to_string(),
            password: options.get(keys::PASSWORD).map(str::to_string),
            envelope_size: options.get_parsed_or(keys::WINRM_ENVELOP_SIZE, DEFAULT_ENVELOPE_SIZE)?,
            locale: options.get_or(keys::WINRM_LOCALE, DEFAULT_LOCALE).to_string(),
            timeout: options
                .get_or(keys::WINRM_TIMEOUT, DEFAULT_OPERATION_TIMEOUT)
                .to_string(),
            codepage: options.get_parsed_or(keys::WINRM_CODEPAGE, DEFAULT_CODEPAGE)?,
            connection_timeout,
            so_timeout: (so_timeout_millis > 0).then(|| Duration::from_millis(so_timeout_millis)),
            certificate_trust: options.get_parsed_or(
                keys::WINRM_HTTPS_CERTIFICATE_TRUST_STRATEGY,
                CertificateTrustStrategy::default(),
            )?,
            hostname_verification: options.get_parsed_or(
                keys::WINRM_HTTPS_HOSTNAME_VERIFICATION_STRATEGY,
                HostnameVerificationStrategy::default(),
            )?,
            kerberos_use_http_spn: options.get_bool_or(keys::WINRM_KERBEROS_USE_HTTP_SPN, false)?,
            kerberos_add_port_to_spn: options
                .get_bool_or(keys::WINRM_KERBEROS_ADD_PORT_TO_SPN, false)?,
            jumpstation: options.get(keys::JUMPSTATION).map(str::to_string),
        })
    }

    /// Get the WinRM endpoint URL
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.https { "https" } else { "http" };
        format!("{}://{}:{}{}", scheme, self.address, self.port, self.context)
    }

    /// Kerberos service principal of the endpoint, e.g. `WSMAN/winbox`.
    pub fn service_principal_name(&self) -> String {
        let service = if self.kerberos_use_http_spn {
            "HTTP"
        } else {
            "WSMAN"
        };
        if self.kerberos_add_port_to_spn {
            format!("{}/{}:{}", service, self.address, self.port)
        } else {
            format!("{}/{}", service, self.address)
        }
    }
}

// ============================================================================
// WinRM Connection
// ============================================================================

/// WinRM connection for executing commands on Windows hosts
pub struct WinRmConnection {
    base: BaseConnection,
    config: WinRmConfig,
    transport: Arc<WinRmTransport>,
}

impl fmt::Debug for WinRmConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinRmConnection")
            .field("identifier", &self.base.identifier())
            .field("config", &self.config)
            .finish()
    }
}

impl WinRmConnection {
    /// Create a connection using Basic authentication only.
    pub fn new(options: &ConnectionOptions) -> Result<Self> {
        Self::with_spnego_provider(options, None)
    }

    /// Create a connection that negotiates Kerberos through `provider` when
    /// the username is in `user@realm` form.
    pub fn with_spnego_provider(
        options: &ConnectionOptions,
        provider: Option<Arc<dyn SpnegoTokenProvider>>,
    ) -> Result<Self> {
        let base = BaseConnection::new(WINRM_PROTOCOL, options, None)?;
        if base.os() != OperatingSystemFamily::Windows {
            return Err(Error::UnsupportedOperation(format!(
                "WinRM connections are only supported for Windows hosts, not {}",
                base.os()
            )));
        }

        let config = WinRmConfig::from_options(options, base.connection_timeout())?;
        let transport = Arc::new(WinRmTransport::new(&config, provider)?);
        let base = base.with_identifier(format!("winrm://{}:{}", config.address, config.port));
        info!(
            connection = %base.identifier(),
            https = config.https,
            "Created WinRM connection"
        );

        Ok(Self {
            base,
            config,
            transport,
        })
    }

    /// Effective WinRM settings.
    pub fn config(&self) -> &WinRmConfig {
        &self.config
    }

    /// Command text sent to the shell, including the directory change.
    fn command_text(&self, cmd_line: &CmdLine, for_logging: bool) -> Result<String> {
        let command = cmd_line.to_command_line(self.base.os(), for_logging)?;
        match self.working_directory() {
            Some(dir) => {
                let mut cd = CmdLine::new();
                cd.add_raw("cd").add_raw("/d").add_argument(dir.as_str());
                Ok(format!(
                    "{} {} {}",
                    cd.to_command_line(self.base.os(), for_logging)?,
                    self.base.os().command_separator(),
                    command
                ))
            }
            None => Ok(command),
        }
    }

    /// Run a `cmd` built-in and return its exit code and stdout.
    async fn run_builtin(&self, cmd_line: &CmdLine) -> Result<(i32, String)> {
        let result = self.execute_capturing(cmd_line).await?;
        Ok((result.exit_code, result.stdout))
    }
}

#[async_trait]
impl Connection for WinRmConnection {
    fn base(&self) -> &BaseConnection {
        &self.base
    }

    async fn start_process(&self, cmd_line: &CmdLine) -> Result<Box<dyn Process>> {
        self.base.check_can_start_process()?;
        let command = self.command_text(cmd_line, false)?;
        let loggable = self.command_text(cmd_line, true)?;
        debug!(
            connection = %self.base.identifier(),
            command = %loggable,
            "Starting WinRM process"
        );

        let client = Arc::new(WinRmClient::new(&self.config, self.transport.clone()));
        client.create_shell().await?;
        if let Err(e) = client.execute_command(&command).await {
            if let Err(cleanup) = client.delete_shell().await {
                warn!(error = %cleanup, "Failed to delete WinRM shell after command failure");
            }
            return Err(e);
        }

        Ok(Box::new(WinRmProcess::start(client)))
    }

    async fn exists(&self, path: &HostPath) -> Result<bool> {
        let mut cmd = CmdLine::new();
        cmd.add_raw("if")
            .add_raw("exist")
            .add_argument(path.as_str())
            .add_raw("(echo")
            .add_raw("present)")
            .add_raw("else")
            .add_raw("(echo")
            .add_raw("absent)");
        let (_, stdout) = self.run_builtin(&cmd).await?;
        match stdout.trim() {
            "present" => Ok(true),
            "absent" => Ok(false),
            other => Err(Error::protocol(format!(
                "Cannot determine whether {} exists: unexpected output '{}'",
                path, other
            ))),
        }
    }

    async fn mkdir(&self, path: &HostPath) -> Result<()> {
        let mut cmd = CmdLine::new();
        cmd.add_raw("mkdir").add_argument(path.as_str());
        let (code, _) = self.run_builtin(&cmd).await?;
        if code != 0 {
            return Err(Error::protocol(format!(
                "Cannot create directory {}: mkdir exited with code {}",
                path, code
            )));
        }
        Ok(())
    }

    async fn delete_recursively(&self, path: &HostPath) -> Result<()> {
        let mut cmd = CmdLine::new();
        cmd.add_raw("if")
            .add_raw("exist")
            .add_argument(format!("{}\\*", path.as_str()))
            .add_raw("(rmdir")
            .add_raw("/s")
            .add_raw("/q")
            .add_argument(path.as_str())
            .add_raw(")")
            .add_raw("else")
            .add_raw("(del")
            .add_raw("/f")
            .add_raw("/q")
            .add_argument(path.as_str())
            .add_raw(")");
        let (code, _) = self.run_builtin(&cmd).await?;
        if code != 0 {
            return Err(Error::protocol(format!(
                "Cannot delete {}: command exited with code {}",
                path, code
            )));
        }
        debug!(path = %path, "Deleted remote path");
        Ok(())
    }
}
