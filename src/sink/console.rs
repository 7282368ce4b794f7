//! Standard output and standard error sinks

use super::{Sink, SinkMetrics};
use crate::config::LogLevel;
use crate::error::LogResult;
use crate::format::{LogEntry, LogFormatter};
use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};

/// Which standard stream a [`ConsoleSink`] writes to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// Console sink
pub struct ConsoleSink {
    /// Sink name
    name: String,

    /// Target stream
    stream: ConsoleStream,

    /// Minimum log level
    min_level: LogLevel,

    /// Formatter
    formatter: Box<dyn LogFormatter>,

    writes: AtomicU64,
    bytes_written: AtomicU64,
}

impl ConsoleSink {
    /// Create a sink on standard output
    pub fn stdout(name: impl Into<String>, min_level: LogLevel, formatter: Box<dyn LogFormatter>) -> Self {
        Self::new(name, ConsoleStream::Stdout, min_level, formatter)
    }

    /// Create a sink on standard error
    pub fn stderr(name: impl Into<String>, min_level: LogLevel, formatter: Box<dyn LogFormatter>) -> Self {
        Self::new(name, ConsoleStream::Stderr, min_level, formatter)
    }

    fn new(
        name: impl Into<String>,
        stream: ConsoleStream,
        min_level: LogLevel,
        formatter: Box<dyn LogFormatter>,
    ) -> Self {
        Self {
            name: name.into(),
            stream,
            min_level,
            formatter,
            writes: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
        }
    }

    /// Target stream
    pub fn stream(&self) -> ConsoleStream {
        self.stream
    }
}

impl Sink for ConsoleSink {
    fn name(&self) -> &str {
        &self.name
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }

    fn emit(&self, entry: &LogEntry) -> LogResult<()> {
        if !self.should_log(entry.level) {
            return Ok(());
        }

        let formatted = self.formatter.format(entry)?;
        match self.stream {
            ConsoleStream::Stdout => writeln!(io::stdout().lock(), "{formatted}")?,
            ConsoleStream::Stderr => writeln!(io::stderr().lock(), "{formatted}")?,
        }

        self.writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written
            .fetch_add(formatted.len() as u64 + 1, Ordering::Relaxed);
        Ok(())
    }

    fn flush(&self) -> LogResult<()> {
        match self.stream {
            ConsoleStream::Stdout => io::stdout().flush()?,
            ConsoleStream::Stderr => io::stderr().flush()?,
        }
        Ok(())
    }

    fn metrics(&self) -> SinkMetrics {
        SinkMetrics {
            writes: self.writes.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            ..SinkMetrics::default()
        }
    }
}
