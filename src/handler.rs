//! Callbacks that receive process output.
//!
//! [`Connection::execute`](crate::connection::Connection::execute) pumps
//! stdout and stderr byte by byte into an [`OutputHandler`] each. Handlers are
//! shared with the pump tasks, so they take `&self` and keep their own state
//! behind a lock.

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{info, warn};

/// Receives the output of one stream of a process.
pub trait OutputHandler: Send + Sync {
    /// Called for every byte read, before line assembly.
    fn handle_byte(&self, _byte: u8) {}

    /// Called for every complete line, without its line ending.
    fn handle_line(&self, line: &str);
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct CapturingHandler {
    lines: Mutex<Vec<String>>,
}

impl CapturingHandler {
    /// Create an empty capturing handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines captured so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    /// Captured lines joined with `\n`.
    pub fn output(&self) -> String {
        self.lines.lock().join("\n")
    }
}

impl OutputHandler for CapturingHandler {
    fn handle_line(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Forwards each line to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingHandler {
    stream: &'static str,
    as_warning: bool,
}

impl LoggingHandler {
    /// Log lines at info level, tagged with `stream`.
    pub fn info(stream: &'static str) -> Self {
        Self {
            stream,
            as_warning: false,
        }
    }

    /// Log lines at warn level, tagged with `stream`.
    pub fn warn(stream: &'static str) -> Self {
        Self {
            stream,
            as_warning: true,
        }
    }
}

impl OutputHandler for LoggingHandler {
    fn handle_line(&self, line: &str) {
        if self.as_warning {
            warn!(stream = self.stream, "{}", line);
        } else {
            info!(stream = self.stream, "{}", line);
        }
    }
}

/// Fans output out to several handlers, in order.
#[derive(Clone, Default)]
pub struct MultipleHandler {
    handlers: Vec<Arc<dyn OutputHandler>>,
}

impl MultipleHandler {
    /// Combine `handlers`.
    pub fn new(handlers: Vec<Arc<dyn OutputHandler>>) -> Self {
        Self { handlers }
    }
}

impl OutputHandler for MultipleHandler {
    fn handle_byte(&self, byte: u8) {
        for handler in &self.handlers {
            handler.handle_byte(byte);
        }
    }

    fn handle_line(&self, line: &str) {
        for handler in &self.handlers {
            handler.handle_line(line);
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHandler;

impl OutputHandler for NullHandler {
    fn handle_line(&self, _line: &str) {}
}
