//! Injectable logger for connection lifecycle messages.
//!
//! The manager reports every lifecycle transition through a [`Logger`].
//! [`TracingLogger`] forwards to `tracing` and is the default; [`MemoryLogger`]
//! keeps messages in memory so callers can assert on them.

use std::fmt;

use parking_lot::Mutex;
use tracing::Level;

/// Sink for lifecycle diagnostics.
pub trait Logger: Send + Sync {
    /// Log a debug message.
    fn debug(&self, message: &str);

    /// Log an informational message.
    fn info(&self, message: &str);

    /// Log a warning.
    fn warn(&self, message: &str);

    /// Log an error.
    fn error(&self, message: &str);
}

/// Logger that forwards to the `tracing` macros at the matching level.
#[derive(Debug, Clone)]
pub struct TracingLogger {
    scope: String,
}

impl TracingLogger {
    /// Create a logger that tags its events with `scope = "mongo"`.
    pub fn new() -> Self {
        Self::with_scope("mongo")
    }

    /// Create a logger that tags its events with the given scope.
    pub fn with_scope(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    /// The scope attached to every event.
    pub fn scope(&self) -> &str {
        &self.scope
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for TracingLogger {
    fn debug(&self, message: &str) {
        tracing::debug!(scope = %self.scope, "{}", message);
    }

    fn info(&self, message: &str) {
        tracing::info!(scope = %self.scope, "{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!(scope = %self.scope, "{}", message);
    }

    fn error(&self, message: &str) {
        tracing::error!(scope = %self.scope, "{}", message);
    }
}

/// A single captured log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Level the message was logged at.
    pub level: Level,
    /// The message text.
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Logger that records messages in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    /// Create an empty logger.
    pub fn new() -> Self {
        Self::default()
    }

    /// All records captured so far, in logging order.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    /// Messages logged at `level`, in logging order.
    pub fn messages(&self, level: Level) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter(|record| record.level == level)
            .map(|record| record.message.clone())
            .collect()
    }

    /// Whether any message at `level` contains `needle`.
    pub fn contains(&self, level: Level, needle: &str) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.level == level && record.message.contains(needle))
    }

    /// Number of messages logged at `level`.
    pub fn count(&self, level: Level) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|record| record.level == level)
            .count()
    }

    /// Drop all captured records.
    pub fn clear(&self) {
        self.records.lock().clear();
    }

    fn push(&self, level: Level, message: &str) {
        self.records.lock().push(LogRecord {
            level,
            message: message.to_string(),
        });
    }
}

impl Logger for MemoryLogger {
    fn debug(&self, message: &str) {
        self.push(Level::DEBUG, message);
    }

    fn info(&self, message: &str) {
        self.push(Level::INFO, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::WARN, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::ERROR, message);
    }
}
