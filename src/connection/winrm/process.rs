//! Process handle over a running WinRM command.
//!
//! Two background tasks bridge the polling protocol to in-memory pipes:
//! the input pump forwards whatever is written to stdin with `Send`
//! requests, and the output pump loops on `Receive` and writes the decoded
//! chunks into the stdout and stderr pipes. Callers only ever see the pipe
//! ends.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::client::WinRmClient;
use crate::error::{Error, Result};
use crate::process::{Process, ProcessInput, ProcessOutput, ProcessState, StreamSlot};

/// Capacity of each in-memory pipe.
const PIPE_SIZE: usize = 64 * 1024;

/// Largest stdin chunk sent in one request.
const INPUT_CHUNK_SIZE: usize = 1024;

/// A command running in a WinRM shell.
pub struct WinRmProcess {
    client: Arc<WinRmClient>,
    stdin: StreamSlot<ProcessInput>,
    stdout: StreamSlot<ProcessOutput>,
    stderr: StreamSlot<ProcessOutput>,
    state: Mutex<ProcessState>,
    failure: Arc<Mutex<Option<Error>>>,
    output_done: watch::Receiver<bool>,
    shutdown: CancellationToken,
    shell_released: AtomicBool,
}

impl WinRmProcess {
    /// Start the pumps for a client whose command is already running.
    pub(crate) fn start(client: Arc<WinRmClient>) -> Self {
        let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_SIZE);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_SIZE);
        let (stderr_writer, stderr_reader) = tokio::io::duplex(PIPE_SIZE);
        let shutdown = CancellationToken::new();
        let failure = Arc::new(Mutex::new(None));
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(pump_input(client.clone(), stdin_reader, shutdown.clone()));
        tokio::spawn(pump_output(
            client.clone(),
            stdout_writer,
            stderr_writer,
            shutdown.clone(),
            failure.clone(),
            done_tx,
        ));

        let stdin: ProcessInput = Box::new(stdin_writer);
        let stdout: ProcessOutput = Box::new(stdout_reader);
        let stderr: ProcessOutput = Box::new(stderr_reader);
        Self {
            client,
            stdin: StreamSlot::new(stdin),
            stdout: StreamSlot::new(stdout),
            stderr: StreamSlot::new(stderr),
            state: Mutex::new(ProcessState::Running),
            failure,
            output_done: done_rx,
            shutdown,
            shell_released: AtomicBool::new(false),
        }
    }

    /// Delete the shell unless that was already attempted.
    async fn release_shell(&self) {
        if self.shell_released.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.client.delete_shell().await {
            warn!(error = %e, "Failed to delete WinRM shell");
        }
    }
}

impl Drop for WinRmProcess {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if self.shell_released.swap(true, Ordering::SeqCst) {
            return;
        }

        // Dropped without wait_for or destroy, e.g. a cancelled execute future.
        let running = self.state.lock().exit_code().is_none();
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(shell_id = ?self.client.shell_id(), "No runtime to delete WinRM shell, leaking it");
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            debug!(shell_id = ?client.shell_id(), "Cleaning up abandoned WinRM process");
            if running {
                if let Err(e) = client.signal().await {
                    warn!(error = %e, "Failed to signal WinRM command");
                }
            }
            if let Err(e) = client.delete_shell().await {
                warn!(error = %e, "Failed to delete WinRM shell");
            }
        });
    }
}

/// Resolves once the output pump has finished or its sender is gone.
async fn output_finished(mut done: watch::Receiver<bool>) {
    loop {
        if *done.borrow_and_update() {
            return;
        }
        if done.changed().await.is_err() {
            return;
        }
    }
}

async fn pump_input(client: Arc<WinRmClient>, mut source: DuplexStream, shutdown: CancellationToken) {
    let mut buf = vec![0u8; INPUT_CHUNK_SIZE];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = source.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    debug!(error = %e, "Stopped reading process input");
                    break;
                }
            },
        };
        if let Err(e) = client.send_input(&buf[..n]).await {
            debug!(error = %e, "Stopped forwarding process input");
            break;
        }
    }
    trace!("Input pump finished");
}

async fn pump_output(
    client: Arc<WinRmClient>,
    stdout: DuplexStream,
    stderr: DuplexStream,
    shutdown: CancellationToken,
    failure: Arc<Mutex<Option<Error>>>,
    done: watch::Sender<bool>,
) {
    let mut stdout = Some(stdout);
    let mut stderr = Some(stderr);
    let result = poll_output(&client, &mut stdout, &mut stderr, &shutdown).await;

    if let Err(e) = result {
        debug!(error = %e, "Output pump failed");
        *failure.lock() = Some(e);
    }
    drop(stdout);
    drop(stderr);
    trace!("Output pump finished");
    let _ = done.send(true);
}

async fn poll_output(
    client: &WinRmClient,
    stdout: &mut Option<DuplexStream>,
    stderr: &mut Option<DuplexStream>,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut out = Vec::new();
    let mut err = Vec::new();
    while !shutdown.is_cancelled() {
        let more = client.receive_output(&mut out, &mut err).await?;
        forward("stdout", stdout, &mut out, shutdown).await;
        forward("stderr", stderr, &mut err, shutdown).await;
        if !more {
            break;
        }
    }
    Ok(())
}

/// Write `data` to `pipe`, dropping the pipe once its reader is gone.
async fn forward(
    name: &'static str,
    pipe: &mut Option<DuplexStream>,
    data: &mut Vec<u8>,
    shutdown: &CancellationToken,
) {
    if data.is_empty() {
        return;
    }
    if let Some(writer) = pipe.as_mut() {
        let written = tokio::select! {
            result = writer.write_all(data.as_slice()) => result,
            _ = shutdown.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "process destroyed")),
        };
        if let Err(e) = written {
            debug!(stream = name, error = %e, "Discarding further output");
            *pipe = None;
        }
    }
    data.clear();
}

#[async_trait]
impl Process for WinRmProcess {
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
        tokio::select! {
            _ = output_finished(self.output_done.clone()) => {}
            _ = self.shutdown.cancelled() => {}
        }
        self.release_shell().await;
        self.shutdown.cancel();

        if let Some(code) = self.state.lock().exit_code() {
            return Ok(code);
        }

        let failure = self.failure.lock().take();
        let result = match failure {
            Some(e) => Err(e),
            None => self.client.exit_value().ok_or_else(|| {
                Error::protocol("WinRM command finished without reporting an exit code")
            }),
        };
        let code = match &result {
            Ok(code) => *code,
            Err(_) => -1,
        };
        self.state.lock().terminate(code);
        result
    }

    async fn destroy(&self) {
        let code = self.client.exit_value().unwrap_or(-1);
        if !self.state.lock().terminate(code) {
            return;
        }
        debug!(shell_id = ?self.client.shell_id(), "Destroying WinRM process");

        drop(self.stdin.take());
        if let Err(e) = self.client.signal().await {
            warn!(error = %e, "Failed to signal WinRM command");
        }
        self.shutdown.cancel();
        self.release_shell().await;
    }

    fn exit_value(&self) -> Result<i32> {
        self.state.lock().exit_value()
    }
}
