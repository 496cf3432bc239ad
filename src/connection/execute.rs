//! Pumping process output into handlers while waiting for completion.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Barrier;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::handler::OutputHandler;
use crate::process::{Process, ProcessOutput};

/// How long pumps may keep draining after the process has exited.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

const PUMP_BUFFER_SIZE: usize = 1024;

/// Wait for `process`, feeding stdout and stderr to their handlers.
pub(super) async fn drive(
    process: Box<dyn Process>,
    stdout_handler: Arc<dyn OutputHandler>,
    stderr_handler: Arc<dyn OutputHandler>,
    cancel: CancellationToken,
) -> Result<i32> {
    drop(process.take_stdin());

    // Both pumps and this task meet here before we block on the process.
    let started = Arc::new(Barrier::new(3));
    let stdout_pump = tokio::spawn(pump_output(
        "stdout",
        process.take_stdout(),
        stdout_handler,
        started.clone(),
    ));
    let stderr_pump = tokio::spawn(pump_output(
        "stderr",
        process.take_stderr(),
        stderr_handler,
        started.clone(),
    ));
    started.wait().await;

    let outcome = tokio::select! {
        result = process.wait_for() => result,
        _ = cancel.cancelled() => {
            warn!("Execution cancelled, destroying process");
            process.destroy().await;
            Err(Error::Interrupted(
                "Execution cancelled while waiting for the process to finish".to_string(),
            ))
        }
    };

    let drain = outcome.is_ok().then_some(PUMP_DRAIN_TIMEOUT);
    finish_pump("stdout", stdout_pump, drain).await;
    finish_pump("stderr", stderr_pump, drain).await;

    if let Ok(code) = &outcome {
        debug!(exit_code = code, "Process finished");
    }
    outcome
}

/// Read `stream` to the end, reporting bytes and complete lines to `handler`.
async fn pump_output(
    name: &'static str,
    stream: Option<ProcessOutput>,
    handler: Arc<dyn OutputHandler>,
    started: Arc<Barrier>,
) {
    started.wait().await;
    let Some(mut reader) = stream else {
        return;
    };

    let mut line: Vec<u8> = Vec::new();
    let mut buf = [0u8; PUMP_BUFFER_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                debug!(stream = name, error = %e, "Stopped reading process output");
                break;
            }
        };
        for &byte in &buf[..n] {
            handler.handle_byte(byte);
            if byte == b'\n' {
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                handler.handle_line(&String::from_utf8_lossy(&line));
                line.clear();
            } else {
                line.push(byte);
            }
        }
    }

    if !line.is_empty() {
        handler.handle_line(&String::from_utf8_lossy(&line));
    }
    trace!(stream = name, "Output pump finished");
}

/// Let a pump drain for up to `drain`, then stop it and wait for it.
async fn finish_pump(name: &'static str, mut pump: JoinHandle<()>, drain: Option<Duration>) {
    if let Some(limit) = drain {
        if tokio::time::timeout(limit, &mut pump).await.is_ok() {
            return;
        }
        warn!(stream = name, "Output pump still running after process exit, stopping it");
    }
    pump.abort();
    let _ = pump.await;
}
