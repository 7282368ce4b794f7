//! # layerlog
//!
//! Layered application logging: messages are routed by layer name to
//! console, file and pluggable sinks, with sensitive data scrubbed on the
//! way through.
//!
//! ## Features
//!
//! - Named layers with a `requested -> DEFAULT -> __CENTRALIZED__` fallback
//! - Buffered file sinks with size-based rotation and numbered backups
//! - Text, JSON, CSV, syslog and GELF line formats
//! - Ordered redaction of credentials and PII
//! - Process-wide performance counters and error tracking
//!
//! ## Architecture
//!
//! A [`Logger`] owns a [`router::LayerRouter`], which resolves layer names
//! and caches the resulting sink sets. Sinks are built by a
//! [`sink::SinkFactory`] that falls back from file to console and hands
//! unknown destination types to registered [`sink::SinkExtension`]s.
//! Failures inside the logging path never reach the caller; they are
//! counted by the [`telemetry::ErrorTracker`].
//!
//! ```no_run
//! use layerlog::config::{DestinationSpec, LayerConfig, LoggerConfig};
//! use layerlog::Logger;
//!
//! let config = LoggerConfig::new()
//!     .with_layer("DEFAULT", LayerConfig::new().with_destination(DestinationSpec::console()))
//!     .with_layer("db", LayerConfig::new().with_destination(DestinationSpec::file("logs/db.log")));
//!
//! let logger = Logger::new(config)?;
//! logger.info("connected", "db");
//! logger.warning("cache miss", "api"); // no "api" layer: goes to DEFAULT
//! logger.close();
//! # Ok::<(), layerlog::LogError>(())
//! ```

pub mod config;
pub mod error;
pub mod format;
pub mod logger;
pub mod redaction;
pub mod rotation;
pub mod router;
pub mod sink;
pub mod telemetry;

pub use config::{LogLevel, LoggerConfig};
pub use error::{LogError, LogResult};
pub use logger::{Logger, LoggerBuilder};
