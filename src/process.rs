//! Running commands.
//!
//! A [`Process`] is the handle a connection returns from
//! [`start_process`](crate::connection::Connection::start_process). Its three
//! streams behave like ordinary pipes whatever the transport does underneath;
//! for WinRM they are fed by background pump tasks that poll the server.
//!
//! `wait_for`, `destroy` and `exit_value` may be called concurrently from
//! different tasks. `destroy` in particular is meant to be called while
//! another task is parked in `wait_for`.

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::{Error, Result};

/// Writable end of a process's standard input.
pub type ProcessInput = Box<dyn AsyncWrite + Send + Unpin>;

/// Readable end of a process's standard output or error.
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Lifecycle of a process handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Started and not yet reaped or destroyed.
    Running,
    /// Finished; never goes back to `Running`.
    Terminated(i32),
}

impl ProcessState {
    /// Exit code if terminated.
    pub fn exit_code(self) -> Option<i32> {
        match self {
            ProcessState::Running => None,
            ProcessState::Terminated(code) => Some(code),
        }
    }

    /// Move to `Terminated(code)` unless already terminated.
    ///
    /// Returns `true` if this call made the transition.
    pub fn terminate(&mut self, code: i32) -> bool {
        match self {
            ProcessState::Running => {
                *self = ProcessState::Terminated(code);
                true
            }
            ProcessState::Terminated(_) => false,
        }
    }

    /// Exit code, or `IllegalState` while still running.
    pub fn exit_value(self) -> Result<i32> {
        self.exit_code().ok_or_else(|| {
            Error::IllegalState("Process has not terminated yet".to_string())
        })
    }
}

/// Handle on a command executing on a host.
#[async_trait]
pub trait Process: Send + Sync {
    /// Take the stdin stream. Returns `None` once taken or after `destroy`.
    ///
    /// Dropping the returned writer closes the remote command's input.
    fn take_stdin(&self) -> Option<ProcessInput>;

    /// Take the stdout stream. Returns `None` once taken.
    fn take_stdout(&self) -> Option<ProcessOutput>;

    /// Take the stderr stream. Returns `None` once taken.
    fn take_stderr(&self) -> Option<ProcessOutput>;

    /// Wait for the command to finish and return its exit code.
    async fn wait_for(&self) -> Result<i32>;

    /// Forcibly terminate the command. Calling it again does nothing.
    async fn destroy(&self);

    /// Exit code of a terminated process.
    ///
    /// Fails with [`Error::IllegalState`] while the process is running.
    fn exit_value(&self) -> Result<i32>;
}

/// A stream handed out at most once.
pub(crate) struct StreamSlot<T> {
    inner: Mutex<Option<T>>,
}

impl<T> StreamSlot<T> {
    pub(crate) fn new(stream: T) -> Self {
        Self {
            inner: Mutex::new(Some(stream)),
        }
    }

    pub(crate) fn take(&self) -> Option<T> {
        self.inner.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_terminates_once() {
        let mut state = ProcessState::Running;
        assert!(state.exit_value().is_err());

        assert!(state.terminate(3));
        assert!(!state.terminate(0));
        assert_eq!(state, ProcessState::Terminated(3));
        assert_eq!(state.exit_value().unwrap(), 3);
    }

    #[test]
    fn test_stream_slot_hands_out_once() {
        let slot = StreamSlot::new(42);
        assert_eq!(slot.take(), Some(42));
        assert_eq!(slot.take(), None);
    }
}
