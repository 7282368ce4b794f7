//! Output sinks and the factory that builds them

mod console;
mod factory;
mod file;
mod memory;

pub use console::{ConsoleSink, ConsoleStream};
pub use factory::{SinkExtension, SinkFactory, SinkRequest};
pub use file::BufferedFileSink;
pub use memory::MemorySink;

use crate::config::LogLevel;
use crate::error::LogResult;
use crate::format::LogEntry;
use serde::Serialize;
use std::collections::BTreeMap;

/// A destination for formatted log lines.
///
/// Sinks are shared between threads; every method takes `&self`.
pub trait Sink: Send + Sync {
    /// Name used in metrics and diagnostics
    fn name(&self) -> &str;

    /// Minimum level this sink writes
    fn min_level(&self) -> LogLevel;

    /// Write an entry (entries below `min_level` are ignored)
    fn emit(&self, entry: &LogEntry) -> LogResult<()>;

    /// Push buffered output to its destination
    fn flush(&self) -> LogResult<()>;

    /// Flush and release resources; idempotent
    fn close(&self) -> LogResult<()> {
        self.flush()
    }

    /// Check if this sink should write the given level
    fn should_log(&self, level: LogLevel) -> bool {
        level.should_log(self.min_level())
    }

    /// Counters for this sink
    fn metrics(&self) -> SinkMetrics {
        SinkMetrics::default()
    }
}

/// Per-sink counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SinkMetrics {
    /// Lines accepted
    pub writes: u64,
    /// Flushes that wrote data
    pub flushes: u64,
    /// Bytes written to the destination
    pub bytes_written: u64,
    /// File rotations
    pub rotations: u64,
    /// Lines lost to write failures
    pub dropped_lines: u64,
}

impl SinkMetrics {
    /// Counters keyed by name
    pub fn to_map(&self) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("writes".to_string(), self.writes),
            ("flushes".to_string(), self.flushes),
            ("bytes_written".to_string(), self.bytes_written),
            ("rotations".to_string(), self.rotations),
            ("dropped_lines".to_string(), self.dropped_lines),
        ])
    }
}
