//! Performance counters and error tracking shared by every logger

mod errors;
mod performance;

pub(crate) use errors::last_resort;
pub use errors::{ErrorCategory, ErrorReport, ErrorStats, ErrorTracker, ErrorTrackerConfig};
pub use performance::{PerformanceMonitor, PerformanceSnapshot};
