//! Configuration type definitions.

use super::size::parse_size;
use crate::error::{LogError, LogResult};
use crate::telemetry::ErrorTrackerConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Name of the catch-all layer consulted when a requested layer is missing.
pub const DEFAULT_LAYER: &str = "DEFAULT";

/// The one reserved-pattern layer name user configuration may define.
pub const CENTRALIZED_LAYER: &str = "__CENTRALIZED__";

/// Returns true if `name` matches the reserved `__NAME__` pattern.
pub fn is_reserved_name(name: &str) -> bool {
    name.len() >= 4 && name.starts_with("__") && name.ends_with("__")
}

/// Log severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    #[default]
    Info,
    /// Something unexpected but handled
    Warning,
    /// An operation failed
    Error,
    /// The process may not be able to continue
    Critical,
}

impl LogLevel {
    /// All levels in ascending order
    pub const ALL: [LogLevel; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Parse from string, case-insensitively
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warning" | "warn" => Some(Self::Warning),
            "error" => Some(Self::Error),
            "critical" | "fatal" => Some(Self::Critical),
            _ => None,
        }
    }

    /// Check if this level should be logged given a minimum level
    pub fn should_log(&self, min_level: LogLevel) -> bool {
        *self >= min_level
    }

    /// RFC 5424 severity code
    pub fn syslog_severity(&self) -> u8 {
        match self {
            Self::Debug => 7,
            Self::Info => 6,
            Self::Warning => 4,
            Self::Error => 3,
            Self::Critical => 2,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| LogError::UnknownLevel(s.to_string()))
    }
}

impl TryFrom<String> for LogLevel {
    type Error = LogError;

    fn try_from(value: String) -> Result<Self, LogError> {
        value.parse()
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

/// Line format written by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain text
    #[default]
    Text,
    /// One JSON object per line
    Json,
    /// Comma separated values
    Csv,
    /// RFC 5424 syslog line
    Syslog,
    /// Graylog extended log format
    Gelf,
    /// Plain text with ANSI colors
    ColoredText,
}

impl OutputFormat {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Syslog => "syslog",
            Self::Gelf => "gelf",
            Self::ColoredText => "colored-text",
        }
    }

    /// Parse from string
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            "csv" => Some(Self::Csv),
            "syslog" => Some(Self::Syslog),
            "gelf" => Some(Self::Gelf),
            "colored-text" | "colored_text" | "color" => Some(Self::ColoredText),
            _ => None,
        }
    }
}

/// Destination kind.
///
/// `console` and `file` are built in; any other name is offered to the
/// registered sink extensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DestinationKind {
    /// Standard output
    Console,
    /// Buffered rotating file
    File,
    /// Handled by a registered extension
    Extension(String),
}

impl DestinationKind {
    /// Convert to string
    pub fn as_str(&self) -> &str {
        match self {
            Self::Console => "console",
            Self::File => "file",
            Self::Extension(name) => name,
        }
    }
}

impl From<String> for DestinationKind {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" | "stdout" => Self::Console,
            "file" => Self::File,
            _ => Self::Extension(value),
        }
    }
}

impl From<DestinationKind> for String {
    fn from(kind: DestinationKind) -> Self {
        kind.as_str().to_string()
    }
}

/// When ANSI colors are emitted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    /// Color only when writing to a terminal
    #[default]
    Auto,
    /// Always color
    Always,
    /// Never color
    Never,
}

/// One output target of a layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationSpec {
    /// Sink kind
    #[serde(rename = "type")]
    pub kind: DestinationKind,

    /// Minimum level for this destination (inherits the layer floor)
    #[serde(default)]
    pub level: Option<LogLevel>,

    /// Output format name
    #[serde(default = "default_format")]
    pub format: String,

    /// File path (file destinations)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Rotation size limit, e.g. "10MB"
    #[serde(default = "default_max_size")]
    pub max_size: String,

    /// Number of rotated backups to keep
    #[serde(default = "default_backup_count")]
    pub backup_count: u32,

    /// Text encoding
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Color policy
    #[serde(default)]
    pub color_mode: ColorMode,

    /// Flush once this many bytes are pending, e.g. "8KB"
    #[serde(default = "default_buffer_size")]
    pub buffer_size: String,

    /// Flush once this long has passed since the last flush
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Any other keys, passed through to sink extensions
    #[serde(flatten)]
    pub options: BTreeMap<String, serde_json::Value>,
}

fn default_format() -> String {
    OutputFormat::Text.as_str().to_string()
}

fn default_max_size() -> String {
    "10MB".to_string()
}

fn default_backup_count() -> u32 {
    5
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_buffer_size() -> String {
    "8KB".to_string()
}

fn default_flush_interval() -> u64 {
    1000
}

impl DestinationSpec {
    /// Create a destination of the given kind with default settings
    pub fn new(kind: DestinationKind) -> Self {
        Self {
            kind,
            level: None,
            format: default_format(),
            path: None,
            max_size: default_max_size(),
            backup_count: default_backup_count(),
            encoding: default_encoding(),
            color_mode: ColorMode::default(),
            buffer_size: default_buffer_size(),
            flush_interval_ms: default_flush_interval(),
            options: BTreeMap::new(),
        }
    }

    /// Create console output
    pub fn console() -> Self {
        Self::new(DestinationKind::Console)
    }

    /// Create file output
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::new(DestinationKind::File)
        }
    }

    /// Builder: set level filter
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Builder: set format
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format.as_str().to_string();
        self
    }

    /// Builder: set rotation limit and retention
    pub fn with_rotation(mut self, max_size: impl Into<String>, backup_count: u32) -> Self {
        self.max_size = max_size.into();
        self.backup_count = backup_count;
        self
    }

    /// Builder: set flush thresholds
    pub fn with_buffering(mut self, buffer_size: impl Into<String>, flush_interval_ms: u64) -> Self {
        self.buffer_size = buffer_size.into();
        self.flush_interval_ms = flush_interval_ms;
        self
    }

    /// Builder: set color mode
    pub fn with_color_mode(mut self, mode: ColorMode) -> Self {
        self.color_mode = mode;
        self
    }

    /// Builder: set an extension option
    pub fn with_option(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Validate a file destination and resolve its sizes
    pub fn file_settings(&self) -> LogResult<FileSettings> {
        let path = match &self.path {
            Some(path) if !path.as_os_str().is_empty() => path.clone(),
            _ => return Err(LogError::validation("file destination requires a path")),
        };

        if !is_utf8_encoding(&self.encoding) {
            tracing::warn!(
                encoding = %self.encoding,
                path = %path.display(),
                "unsupported encoding, writing UTF-8"
            );
        }

        Ok(FileSettings {
            path,
            max_size: parse_size(&self.max_size)?,
            backup_count: self.backup_count,
            flush_threshold: parse_size(&self.buffer_size)? as usize,
            flush_interval: Duration::from_millis(self.flush_interval_ms),
        })
    }
}

fn is_utf8_encoding(encoding: &str) -> bool {
    matches!(
        encoding.trim().to_ascii_lowercase().as_str(),
        "utf-8" | "utf8" | "ascii" | "us-ascii"
    )
}

/// Resolved settings for a buffered file sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileSettings {
    /// Current log file
    pub path: PathBuf,
    /// Rotate before the file grows past this many bytes (0 disables)
    pub max_size: u64,
    /// Rotated backups to keep
    pub backup_count: u32,
    /// Flush once this many bytes are buffered
    pub flush_threshold: usize,
    /// Flush once this much time has passed since the last flush
    pub flush_interval: Duration,
}

impl FileSettings {
    /// Settings with the default thresholds for `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_size: 10 * 1024 * 1024,
            backup_count: default_backup_count(),
            flush_threshold: 8 * 1024,
            flush_interval: Duration::from_millis(default_flush_interval()),
        }
    }
}

/// A layer as written in configuration (its name is the map key)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Minimum level (inherits `default_level`)
    #[serde(default)]
    pub level: Option<LogLevel>,

    /// Output targets, in order
    #[serde(default)]
    pub destinations: Vec<DestinationSpec>,
}

impl LayerConfig {
    /// Create an empty layer
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set level
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = Some(level);
        self
    }

    /// Builder: add destination
    pub fn with_destination(mut self, destination: DestinationSpec) -> Self {
        self.destinations.push(destination);
        self
    }
}

/// A named layer with its effective severity floor
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    /// Layer name
    pub name: String,
    /// Minimum level
    pub level: LogLevel,
    /// Output targets, in order
    pub destinations: Vec<DestinationSpec>,
}

/// Root logger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    /// Layers by name
    #[serde(default)]
    pub layers: BTreeMap<String, LayerConfig>,

    /// Level for layers that do not set one
    #[serde(default)]
    pub default_level: LogLevel,

    /// Scrub sensitive data from messages and fields
    #[serde(default = "default_true")]
    pub redact_sensitive: bool,

    /// Build layer sinks on first use instead of up front
    #[serde(default)]
    pub lazy_layers: bool,

    /// Record per-message timing
    #[serde(default = "default_true")]
    pub performance_monitoring: bool,

    /// Error tracker settings; applied if the shared tracker is not built yet
    #[serde(default)]
    pub error_log: Option<ErrorTrackerConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            layers: BTreeMap::new(),
            default_level: LogLevel::Info,
            redact_sensitive: true,
            lazy_layers: false,
            performance_monitoring: true,
            error_log: None,
        }
    }
}

impl LoggerConfig {
    /// Create a new default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a layer
    pub fn with_layer(mut self, name: impl Into<String>, layer: LayerConfig) -> Self {
        self.layers.insert(name.into(), layer);
        self
    }

    /// Builder: set default level
    pub fn with_default_level(mut self, level: LogLevel) -> Self {
        self.default_level = level;
        self
    }

    /// Builder: toggle redaction
    pub fn with_redaction(mut self, enabled: bool) -> Self {
        self.redact_sensitive = enabled;
        self
    }

    /// Builder: toggle lazy layer construction
    pub fn with_lazy_layers(mut self, lazy: bool) -> Self {
        self.lazy_layers = lazy;
        self
    }

    /// Builder: set error tracker settings
    pub fn with_error_log(mut self, error_log: ErrorTrackerConfig) -> Self {
        self.error_log = Some(error_log);
        self
    }

    /// Validate and produce the layer specs.
    ///
    /// # Errors
    ///
    /// Returns [`LogError::Configuration`] if any validator reports an error.
    pub fn layer_specs(&self) -> LogResult<Vec<LayerSpec>> {
        super::validation::validate(self)?;

        Ok(self
            .layers
            .iter()
            .map(|(name, layer)| LayerSpec {
                name: name.clone(),
                level: layer.level.unwrap_or(self.default_level),
                destinations: layer.destinations.clone(),
            })
            .collect())
    }
}
