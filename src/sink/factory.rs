//! Sink construction with fallback strategies

use super::{BufferedFileSink, ConsoleSink, Sink};
use crate::config::{ColorMode, DestinationKind, DestinationSpec, EnvOverrides, LogLevel, OutputFormat};
use crate::error::{LogError, LogResult};
use crate::format::{create_formatter, LogFormatter};
use crate::telemetry::{ErrorCategory, ErrorReport, ErrorTracker, PerformanceMonitor};
use std::fmt;
use std::io::IsTerminal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Everything a strategy needs to build one sink
#[derive(Debug, Clone, Copy)]
pub struct SinkRequest<'a> {
    /// Owning layer
    pub layer: &'a str,
    /// Position of the destination within the layer
    pub index: usize,
    /// Destination settings
    pub spec: &'a DestinationSpec,
    /// Effective minimum level (destination level or the layer floor)
    pub min_level: LogLevel,
}

impl SinkRequest<'_> {
    /// Sink name for a given kind, unique within the router
    pub fn sink_name(&self, kind: &str) -> String {
        format!("{}[{}]:{}", self.layer, self.index, kind)
    }
}

/// Builds sinks for destination kinds the crate does not know.
///
/// Extensions are asked in registration order; the first to return a sink
/// wins.
pub trait SinkExtension: Send + Sync {
    /// Extension name
    fn name(&self) -> &str;

    /// Build a sink, or return `Ok(None)` if this extension does not handle
    /// the destination kind.
    fn create(&self, request: &SinkRequest<'_>) -> LogResult<Option<Arc<dyn Sink>>>;
}

type Strategy = fn(&SinkFactory, &SinkRequest<'_>) -> LogResult<Arc<dyn Sink>>;

/// Turns destination specs into sinks.
///
/// Each destination kind has an ordered list of strategies: file
/// destinations fall back to the console, console destinations have no
/// fallback, other kinds go to the registered extensions. A failed strategy
/// is tracked as a `handler-creation` error and the next one is tried.
pub struct SinkFactory {
    /// Text layout and colors
    layout: Arc<EnvOverrides>,

    /// Registered extensions, in order
    extensions: Vec<Arc<dyn SinkExtension>>,

    perf: Arc<PerformanceMonitor>,
    errors: Arc<ErrorTracker>,

    /// Whether stdout is a terminal (for `ColorMode::Auto`)
    stdout_is_terminal: bool,
}

impl fmt::Debug for SinkFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkFactory")
            .field("layout", &self.layout)
            .field("extensions", &self.extensions.iter().map(|e| e.name()).collect::<Vec<_>>())
            .field("stdout_is_terminal", &self.stdout_is_terminal)
            .finish_non_exhaustive()
    }
}

impl SinkFactory {
    /// Create a factory
    pub fn new(layout: Arc<EnvOverrides>, perf: Arc<PerformanceMonitor>, errors: Arc<ErrorTracker>) -> Self {
        Self {
            layout,
            extensions: Vec::new(),
            perf,
            errors,
            stdout_is_terminal: std::io::stdout().is_terminal(),
        }
    }

    /// Builder: register an extension
    pub fn with_extension(mut self, extension: Arc<dyn SinkExtension>) -> Self {
        self.extensions.push(extension);
        self
    }

    /// The error tracker sinks report to
    pub fn errors(&self) -> &Arc<ErrorTracker> {
        &self.errors
    }

    /// The performance monitor
    pub fn perf(&self) -> &Arc<PerformanceMonitor> {
        &self.perf
    }

    /// Build the sink for one destination, or `None` if every strategy
    /// failed.
    pub fn build(&self, layer: &str, index: usize, spec: &DestinationSpec, layer_level: LogLevel) -> Option<Arc<dyn Sink>> {
        let request = SinkRequest {
            layer,
            index,
            spec,
            min_level: spec.level.unwrap_or(layer_level),
        };

        let strategies: Vec<(&str, Strategy)> = match &spec.kind {
            DestinationKind::Console => vec![("console", Self::build_console as Strategy)],
            DestinationKind::File => vec![
                ("file", Self::build_file as Strategy),
                ("console", Self::build_console as Strategy),
            ],
            DestinationKind::Extension(_) => vec![("extension", Self::build_extension as Strategy)],
        };

        let start = Instant::now();
        for (label, strategy) in strategies {
            match strategy(self, &request) {
                Ok(sink) => {
                    self.perf.record_handler_creation(start.elapsed());
                    debug!(layer, sink = sink.name(), strategy = label, "built sink");
                    return Some(sink);
                },
                Err(err) => {
                    warn!(layer, destination = index, strategy = label, error = %err, "sink strategy failed");
                    self.errors.track(
                        ErrorReport::new(ErrorCategory::HandlerCreation, &err)
                            .component("SinkFactory")
                            .context("layer", layer)
                            .context("destination", index)
                            .context("strategy", label),
                    );
                },
            }
        }
        None
    }

    /// Plain stderr sink used when no layer can be resolved
    pub fn last_resort_sink(&self) -> Arc<dyn Sink> {
        Arc::new(ConsoleSink::stderr(
            "last-resort:stderr",
            LogLevel::Debug,
            create_formatter(OutputFormat::Text, &self.layout, false),
        ))
    }

    fn formatter(&self, request: &SinkRequest<'_>, colors: bool) -> Box<dyn LogFormatter> {
        let format = OutputFormat::parse(&request.spec.format).unwrap_or_else(|| {
            warn!(
                layer = request.layer,
                format = %request.spec.format,
                "unknown output format, using text"
            );
            OutputFormat::Text
        });
        create_formatter(format, &self.layout, colors)
    }

    fn build_console(&self, request: &SinkRequest<'_>) -> LogResult<Arc<dyn Sink>> {
        let colors = self
            .layout
            .colors_enabled(request.spec.color_mode, self.stdout_is_terminal);
        Ok(Arc::new(ConsoleSink::stdout(
            request.sink_name("console"),
            request.min_level,
            self.formatter(request, colors),
        )))
    }

    fn build_file(&self, request: &SinkRequest<'_>) -> LogResult<Arc<dyn Sink>> {
        let settings = request.spec.file_settings()?;
        // Files are never terminals; only an explicit request colors them
        let colors = request.spec.color_mode == ColorMode::Always && !self.layout.disable_color;
        let sink = BufferedFileSink::open(
            request.sink_name("file"),
            settings,
            request.min_level,
            self.formatter(request, colors),
            Some(Arc::clone(&self.errors)),
        )?;
        Ok(Arc::new(sink))
    }

    fn build_extension(&self, request: &SinkRequest<'_>) -> LogResult<Arc<dyn Sink>> {
        for extension in &self.extensions {
            match extension.create(request) {
                Ok(Some(sink)) => {
                    self.perf.record_plugin_event();
                    return Ok(sink);
                },
                Ok(None) => {},
                Err(err) => self.errors.track(
                    ErrorReport::new(ErrorCategory::Plugin, &err)
                        .component("SinkFactory")
                        .context("extension", extension.name())
                        .context("layer", request.layer),
                ),
            }
        }
        Err(LogError::config(format!(
            "no sink extension handles destination type '{}'",
            request.spec.kind.as_str()
        )))
    }
}
