//! Local connection module
//!
//! This module runs commands and manages files on the host this crate runs
//! on, without any network transport. Commands go through `sh -c` (or
//! `cmd /C` on Windows) so they see the same encoding rules as a remote
//! shell would.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io::ErrorKind;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};

use super::{BaseConnection, Connection};
use crate::cmdline::CmdLine;
use crate::error::{Error, Result};
use crate::options::{keys, ConnectionOptions};
use crate::os::OperatingSystemFamily;
use crate::path::HostPath;
use crate::process::{Process, ProcessInput, ProcessOutput, StreamSlot};

/// Protocol name of the local transport.
pub const LOCAL_PROTOCOL: &str = "local";

/// Local connection for executing commands on the current host
#[derive(Debug)]
pub struct LocalConnection {
    base: BaseConnection,
}

impl LocalConnection {
    /// Create a new local connection
    ///
    /// The `os` option defaults to the OS of this host and may not name a
    /// different family.
    pub fn new(options: &ConnectionOptions) -> Result<Self> {
        let host_os = OperatingSystemFamily::local();
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        let base = BaseConnection::new(LOCAL_PROTOCOL, options, Some(host_os))?
            .with_identifier(format!("local:{}", hostname));

        if base.os() != host_os {
            return Err(Error::invalid_option(
                keys::OPERATING_SYSTEM,
                format!("local host is {}, not {}", host_os, base.os()),
            ));
        }

        Ok(Self { base })
    }

    /// Build the command with options
    fn build_command(&self, cmd_line: &CmdLine) -> Result<Command> {
        let line = cmd_line.to_command_line(self.base.os(), false)?;
        let mut cmd = if self.base.os().is_windows() {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(line);
            c
        };

        if let Some(dir) = self.working_directory() {
            cmd.current_dir(dir.as_str());
        }

        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn base(&self) -> &BaseConnection {
        &self.base
    }

    async fn start_process(&self, cmd_line: &CmdLine) -> Result<Box<dyn Process>> {
        self.base.check_can_start_process()?;
        let mut cmd = self.build_command(cmd_line)?;
        let loggable = cmd_line.to_command_line(self.base.os(), true)?;
        debug!(command = %loggable, "Spawning local process");

        let child = cmd.spawn().map_err(|e| {
            Error::protocol(format!("Failed to spawn process: {}", e)).with_source(e)
        })?;
        Ok(Box::new(LocalProcess::spawn(child)))
    }

    async fn exists(&self, path: &HostPath) -> Result<bool> {
        match tokio::fs::symlink_metadata(path.as_str()).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn mkdir(&self, path: &HostPath) -> Result<()> {
        trace!(path = %path, "Creating local directory");
        tokio::fs::create_dir(path.as_str()).await?;
        Ok(())
    }

    async fn delete_recursively(&self, path: &HostPath) -> Result<()> {
        let metadata = tokio::fs::symlink_metadata(path.as_str()).await?;
        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path.as_str()).await?;
        } else {
            tokio::fs::remove_file(path.as_str()).await?;
        }
        debug!(path = %path, "Deleted local path");
        Ok(())
    }
}

/// A child process of this host.
///
/// A reaper task owns the child and publishes its exit code, so `wait_for`
/// and `destroy` never contend for the child itself.
struct LocalProcess {
    stdin: StreamSlot<ProcessInput>,
    stdout: StreamSlot<ProcessOutput>,
    stderr: StreamSlot<ProcessOutput>,
    exit: watch::Receiver<Option<i32>>,
    kill: Mutex<Option<oneshot::Sender<()>>>,
}

impl LocalProcess {
    fn spawn(mut child: Child) -> Self {
        let stdin: ProcessInput = match child.stdin.take() {
            Some(s) => Box::new(s),
            None => Box::new(tokio::io::sink()),
        };
        let stdout: ProcessOutput = match child.stdout.take() {
            Some(s) => Box::new(s),
            None => Box::new(tokio::io::empty()),
        };
        let stderr: ProcessOutput = match child.stderr.take() {
            Some(s) => Box::new(s),
            None => Box::new(tokio::io::empty()),
        };

        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        tokio::spawn(reap(child, kill_rx, exit_tx));

        Self {
            stdin: StreamSlot::new(stdin),
            stdout: StreamSlot::new(stdout),
            stderr: StreamSlot::new(stderr),
            exit: exit_rx,
            kill: Mutex::new(Some(kill_tx)),
        }
    }
}

/// Wait for `child`, killing it first if asked to or if the handle is dropped.
async fn reap(
    mut child: Child,
    kill: oneshot::Receiver<()>,
    exit: watch::Sender<Option<i32>>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill => {
            if let Err(e) = child.start_kill() {
                debug!(error = %e, "Kill request for an already exited process");
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            warn!(error = %e, "Failed to wait for local process");
            -1
        }
    };
    trace!(exit_code = code, "Local process exited");
    let _ = exit.send(Some(code));
}

#[async_trait]
impl Process for LocalProcess {
    fn take_stdin(&self) -> Option<ProcessInput> {
        self.stdin.take()
    }

    fn take_stdout(&self) -> Option<ProcessOutput> {
        self.stdout.take()
    }

    fn take_stderr(&self) -> Option<ProcessOutput> {
        self.stderr.take()
    }

    async fn wait_for(&self) -> Result<i32> {
        let mut exit = self.exit.clone();
        let code = {
            let value = exit
                .wait_for(Option::is_some)
                .await
                .map_err(|_| Error::protocol("Local process reaper stopped unexpectedly"))?;
            value.unwrap_or(-1)
        };
        Ok(code)
    }

    async fn destroy(&self) {
        let kill = self.kill.lock().take();
        if let Some(kill) = kill {
            debug!("Destroying local process");
            drop(self.stdin.take());
            let _ = kill.send(());
        }
    }

    fn exit_value(&self) -> Result<i32> {
        self.exit.borrow().ok_or_else(|| {
            Error::IllegalState("Process has not terminated yet".to_string())
        })
    }
}
