//! Logging utilities and the injectable render logger
//!
//! Library code logs through the `log` facade. The graphics context additionally
//! receives a [`RenderLogger`] at construction so callers (and tests) can observe
//! recoverable conditions such as the transfer-queue fallback without touching a
//! process-wide logger.

use std::sync::Mutex;

pub use log::{debug, info, warn, error, trace};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system with a default filter used when `RUST_LOG` is unset
pub fn init_with_level(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Logging capability handed to the graphics context
pub trait RenderLogger: Send + Sync {
    /// Informational message
    fn info(&self, message: &str);
    /// Recoverable problem
    fn warn(&self, message: &str);
    /// Failure that is about to be returned as an error
    fn error(&self, message: &str);
    /// Verbose diagnostics
    fn debug(&self, message: &str);
}

/// Forwards render messages to the `log` facade under the `renderer` target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCrateLogger;

impl RenderLogger for LogCrateLogger {
    fn info(&self, message: &str) {
        log::info!(target: "renderer", "{message}");
    }

    fn warn(&self, message: &str) {
        log::warn!(target: "renderer", "{message}");
    }

    fn error(&self, message: &str) {
        log::error!(target: "renderer", "{message}");
    }

    fn debug(&self, message: &str) {
        log::debug!(target: "renderer", "{message}");
    }
}

/// Severity of a recorded message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Verbose diagnostics
    Debug,
    /// Informational
    Info,
    /// Recoverable problem
    Warn,
    /// Failure
    Error,
}

/// Logger that keeps every message in memory
#[derive(Debug, Default)]
pub struct MemoryLogger {
    records: Mutex<Vec<(LogLevel, String)>>,
}

impl MemoryLogger {
    /// Create an empty logger
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far
    pub fn records(&self) -> Vec<(LogLevel, String)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Messages logged at the given level
    pub fn messages(&self, level: LogLevel) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m)
            .collect()
    }

    fn push(&self, level: LogLevel, message: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.push((level, message.to_owned()));
        }
    }
}

impl RenderLogger for MemoryLogger {
    fn info(&self, message: &str) {
        self.push(LogLevel::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(LogLevel::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(LogLevel::Error, message);
    }

    fn debug(&self, message: &str) {
        self.push(LogLevel::Debug, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_memory_logger_records_by_level() {
        let logger = Arc::new(MemoryLogger::new());
        let shared: Arc<dyn RenderLogger> = logger.clone();

        shared.info("device selected");
        shared.warn("no dedicated transfer queue, using graphics queue");

        assert_eq!(logger.records().len(), 2);
        assert_eq!(
            logger.messages(LogLevel::Warn),
            vec!["no dedicated transfer queue, using graphics queue".to_string()]
        );
        assert!(logger.messages(LogLevel::Error).is_empty());
    }
}
