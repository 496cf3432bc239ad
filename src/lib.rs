//! # Hostsession - Uniform Command Execution on Local and Remote Hosts
//!
//! Hostsession runs commands and manages temporary files on a host through one
//! abstraction, whatever the transport. It is async-first and built on tokio.
//!
//! ## Core Concepts
//!
//! - **Command lines**: [`CmdLine`](cmdline::CmdLine) values of typed arguments,
//!   encoded per target OS with secrets masked in logs
//! - **OS families**: separators, line endings and defaults for Windows,
//!   Unix and z/OS targets
//! - **Connections**: the [`Connection`](connection::Connection) trait, with
//!   temporary file management and a generic `execute`
//! - **Processes**: handles on running commands exposing stdin, stdout and
//!   stderr as ordinary async pipes
//! - **WinRM**: a WS-Management remote shell client over HTTP(S)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                CmdLine  ──encode(os)──▶  command text                │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Connection (trait)                              │
//! │        temp files · execute · output handlers · close                │
//! └─────────────────────────────────────────────────────────────────────┘
//!                    │                                │
//!                    ▼                                ▼
//! ┌──────────────────────────────┐   ┌──────────────────────────────────┐
//! │       LocalConnection        │   │         WinRmConnection          │
//! │   (tokio::process, fs)       │   │  shell lifecycle over SOAP/HTTP  │
//! └──────────────────────────────┘   └──────────────────────────────────┘
//!                                                     │
//!                                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │          Process: pumps bridge polling to stdin/stdout/stderr        │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use hostsession::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let options = ConnectionOptions::from_file("winbox.toml")?;
//!     let conn = ConnectionFactory::with_builtin().connect("winrm", &options)?;
//!
//!     let script = conn.get_temp_file(Some("setup.bat")).await?;
//!     println!("would upload to {}", script);
//!
//!     let result = conn.execute_capturing(&CmdLine::build(["ver"])).await?;
//!     println!("{}", result.stdout);
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

// Re-export commonly used items in prelude
pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.
    //!
    //! ```rust,ignore
    //! use hostsession::prelude::*;
    //! ```

    pub use crate::cmdline::{CmdLine, CmdLineArgument};
    pub use crate::connection::{
        CommandResult, Connection, ConnectionFactory, LocalConnection, WinRmConnection,
    };
    pub use crate::error::{Error, Result};
    pub use crate::handler::{CapturingHandler, LoggingHandler, MultipleHandler, OutputHandler};
    pub use crate::options::ConnectionOptions;
    pub use crate::os::OperatingSystemFamily;
    pub use crate::path::HostPath;
    pub use crate::process::Process;
}

/// Command-line model and OS-specific encoding.
pub mod cmdline;

/// Connection trait and transports.
pub mod connection;

/// Error types.
pub mod error;

/// Output handlers for executed commands.
pub mod handler;

/// Connection options.
pub mod options;

/// Operating system families.
pub mod os;

/// Paths on a target host.
pub mod path;

/// Process contract.
pub mod process;

pub use error::{Error, Result};
