//! The logger facade

use crate::config::{ConfigLoader, EnvOverrides, LogLevel, LoggerConfig};
use crate::error::LogResult;
use crate::format::{Fields, LogEntry};
use crate::redaction::{neutralize_control_chars, Redactor};
use crate::router::LayerRouter;
use crate::sink::{Sink, SinkExtension, SinkFactory};
use crate::telemetry::{ErrorStats, ErrorTracker, PerformanceMonitor, PerformanceSnapshot};
use std::borrow::Cow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Builder for [`Logger`].
///
/// Without explicit injection the logger uses the process-wide
/// [`PerformanceMonitor::shared`] and [`ErrorTracker::shared`] instances.
pub struct LoggerBuilder {
    config: LoggerConfig,
    perf: Option<Arc<PerformanceMonitor>>,
    errors: Option<Arc<ErrorTracker>>,
    extensions: Vec<Arc<dyn SinkExtension>>,
    overrides: Option<EnvOverrides>,
    redactor: Option<Redactor>,
}

impl LoggerBuilder {
    /// Start from a configuration
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            perf: None,
            errors: None,
            extensions: Vec::new(),
            overrides: None,
            redactor: None,
        }
    }

    /// Use this performance monitor instead of the shared one
    pub fn with_performance_monitor(mut self, perf: Arc<PerformanceMonitor>) -> Self {
        self.perf = Some(perf);
        self
    }

    /// Use this error tracker instead of the shared one
    pub fn with_error_tracker(mut self, errors: Arc<ErrorTracker>) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Register a sink extension (asked in registration order)
    pub fn with_extension(mut self, extension: Arc<dyn SinkExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// Use these presentation settings instead of reading the environment
    pub fn with_env_overrides(mut self, overrides: EnvOverrides) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Use this redactor instead of the built-in rules
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = Some(redactor);
        self
    }

    /// Build the logger.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Configuration`](crate::LogError::Configuration)
    /// for a reserved or empty layer name. Destinations that cannot be built
    /// are not errors; they fall back or are skipped and tracked.
    pub fn build(self) -> LogResult<Logger> {
        let config = self.config;

        let perf = self.perf.unwrap_or_else(|| {
            if config.performance_monitoring {
                PerformanceMonitor::shared()
            } else {
                Arc::new(PerformanceMonitor::disabled())
            }
        });
        let errors = self.errors.unwrap_or_else(|| match &config.error_log {
            Some(error_log) => ErrorTracker::shared_with(error_log.clone()),
            None => ErrorTracker::shared(),
        });

        let layout = Arc::new(self.overrides.unwrap_or_else(EnvOverrides::from_env));
        let factory = self.extensions.into_iter().fold(
            SinkFactory::new(layout, Arc::clone(&perf), Arc::clone(&errors)),
            SinkFactory::with_extension,
        );

        let router = LayerRouter::new(&config, factory)?;
        let redactor = config
            .redact_sensitive
            .then(|| self.redactor.unwrap_or_default());

        tracing::debug!(
            layers = ?router.layer_names(),
            lazy = config.lazy_layers,
            redaction = config.redact_sensitive,
            "logger ready"
        );

        Ok(Logger {
            router,
            redactor,
            perf,
            errors,
            closed: AtomicBool::new(false),
        })
    }
}

/// Routes messages to named layers.
///
/// Logging calls never fail and never panic because of a sink: problems
/// are handed to the [`ErrorTracker`]. Dropping the logger closes it.
pub struct Logger {
    router: LayerRouter,
    redactor: Option<Redactor>,
    perf: Arc<PerformanceMonitor>,
    errors: Arc<ErrorTracker>,
    closed: AtomicBool,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("router", &self.router)
            .field("redactor", &self.redactor)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Logger {
    /// Build a logger with the shared monitor and tracker
    ///
    /// # Errors
    ///
    /// See [`LoggerBuilder::build`].
    pub fn new(config: LoggerConfig) -> LogResult<Self> {
        LoggerBuilder::new(config).build()
    }

    /// Start a builder
    pub fn builder(config: LoggerConfig) -> LoggerBuilder {
        LoggerBuilder::new(config)
    }

    /// Load a TOML or JSON configuration file and build a logger
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> LogResult<Self> {
        Self::new(ConfigLoader::new().load(path)?)
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The layer router
    pub fn router(&self) -> &LayerRouter {
        &self.router
    }

    /// Log `message` to `layer`
    pub fn log(&self, level: LogLevel, message: &str, layer: &str) {
        self.log_with(level, message, layer, Fields::new());
    }

    /// Log `message` with structured fields to `layer`
    pub fn log_with(&self, level: LogLevel, message: &str, layer: &str, fields: Fields) {
        if self.is_closed() {
            return;
        }
        let start = Instant::now();

        let resolved = self.router.resolve(layer);
        if !resolved.accepts(level) {
            return;
        }

        let mut entry = LogEntry::new(level, layer, message).with_fields(fields);
        if let Some(redactor) = &self.redactor {
            self.scrub(redactor, &mut entry);
        }

        resolved.dispatch(&entry);
        self.perf
            .record_log(layer, level, &entry.message, start, Instant::now());
    }

    fn scrub(&self, redactor: &Redactor, entry: &mut LogEntry) {
        let neutralized = match neutralize_control_chars(&entry.message) {
            Cow::Owned(escaped) => Some(escaped),
            Cow::Borrowed(_) => None,
        };
        if let Some(escaped) = neutralized {
            entry.message = escaped;
            self.perf.record_security_event();
        }

        let redacted = match redactor.redact(&entry.message) {
            Cow::Owned(redacted) => Some(redacted),
            Cow::Borrowed(_) => None,
        };
        let mut changed = redacted.is_some();
        if let Some(redacted) = redacted {
            entry.message = redacted;
        }
        changed |= redactor.redact_fields(&mut entry.fields);

        if changed {
            self.perf.record_sanitization_event();
        }
    }

    /// Log with a level name.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::UnknownLevel`](crate::LogError::UnknownLevel) if
    /// the name is not a level.
    pub fn log_named(&self, level: &str, message: &str, layer: &str) -> LogResult<()> {
        let level: LogLevel = level.parse()?;
        self.log(level, message, layer);
        Ok(())
    }

    /// Log with a level name, treating unknown names as INFO
    pub fn log_lenient(&self, level: &str, message: &str, layer: &str) {
        let level = LogLevel::parse(level).unwrap_or_else(|| {
            tracing::debug!(level, "unknown level name, logging at INFO");
            LogLevel::Info
        });
        self.log(level, message, layer);
    }

    /// Log at DEBUG
    pub fn debug(&self, message: &str, layer: &str) {
        self.log(LogLevel::Debug, message, layer);
    }

    /// Log at INFO
    pub fn info(&self, message: &str, layer: &str) {
        self.log(LogLevel::Info, message, layer);
    }

    /// Log at WARNING
    pub fn warning(&self, message: &str, layer: &str) {
        self.log(LogLevel::Warning, message, layer);
    }

    /// Log at ERROR
    pub fn error(&self, message: &str, layer: &str) {
        self.log(LogLevel::Error, message, layer);
    }

    /// Log at CRITICAL
    pub fn critical(&self, message: &str, layer: &str) {
        self.log(LogLevel::Critical, message, layer);
    }

    fn record_sink_metrics(&self, sinks: &[Arc<dyn Sink>]) {
        for sink in sinks {
            self.perf
                .record_handler_metrics(sink.name(), sink.metrics().to_map());
        }
    }

    /// Performance counters, including the latest per-sink metrics
    pub fn performance_metrics(&self) -> PerformanceSnapshot {
        self.record_sink_metrics(&self.router.sinks());
        self.perf.snapshot()
    }

    /// Zero the performance counters
    pub fn reset_performance_metrics(&self) {
        self.perf.reset();
    }

    /// Error counts
    pub fn error_stats(&self) -> ErrorStats {
        self.errors.stats()
    }

    /// Zero the error counts
    pub fn clear_error_stats(&self) {
        self.errors.clear_stats();
    }

    /// The error tracker in use
    pub fn error_tracker(&self) -> &Arc<ErrorTracker> {
        &self.errors
    }

    /// Replace the layer configuration.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Configuration`](crate::LogError::Configuration)
    /// and keeps the current layers if the new configuration is invalid.
    pub fn reconfigure(&self, config: &LoggerConfig) -> LogResult<()> {
        let previous = self.router.sinks();
        self.router.reconfigure(config)?;
        self.record_sink_metrics(&previous);
        Ok(())
    }

    /// Flush every sink
    pub fn flush(&self) {
        self.router.flush();
        self.errors.flush();
    }

    /// Flush and close every sink; later calls are ignored. The shared
    /// monitor and tracker stay open.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sinks = self.router.sinks();
        self.router.close();
        self.record_sink_metrics(&sinks);
        self.errors.flush();
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.close();
    }
}
