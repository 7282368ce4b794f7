//! In-memory sink (for testing)

use super::{Sink, SinkMetrics};
use crate::config::LogLevel;
use crate::error::{LogError, LogResult};
use crate::format::{LogEntry, LogFormatter};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

/// Memory sink that keeps every formatted line
pub struct MemorySink {
    /// Sink name
    name: String,

    /// Minimum log level
    min_level: LogLevel,

    /// Formatter
    formatter: Box<dyn LogFormatter>,

    /// Stored lines
    lines: Mutex<Vec<String>>,

    /// Fail every write when set
    failing: AtomicBool,

    closed: AtomicBool,
}

impl MemorySink {
    /// Create a new memory sink
    pub fn new(name: impl Into<String>, min_level: LogLevel, formatter: Box<dyn LogFormatter>) -> Self {
        Self {
            name: name.into(),
            min_level,
            formatter,
            lines: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Get all stored lines
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Clear stored lines
    pub fn clear(&self) {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Get line count
    pub fn count(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Make every following write fail with an I/O error
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn emit(&self, entry: &LogEntry) -> LogResult<()> {
        if !self.should_log(entry.level) || self.is_closed() {
            return Ok(());
        }
        if self.failing.load(Ordering::Acquire) {
            return Err(LogError::Io(io::Error::other("memory sink set to fail")));
        }

        let formatted = self.formatter.format(entry)?;
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(formatted);
        Ok(())
    }

    fn flush(&self) -> LogResult<()> {
        Ok(())
    }

    fn close(&self) -> LogResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn metrics(&self) -> SinkMetrics {
        let lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        SinkMetrics {
            writes: lines.len() as u64,
            bytes_written: lines.iter().map(|l| l.len() as u64 + 1).sum(),
            ..SinkMetrics::default()
        }
    }
}
