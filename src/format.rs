//! Log entries and line formatters

use crate::config::{EnvOverrides, LogLevel, OutputFormat};
use crate::error::LogResult;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Structured fields attached to an entry
pub type Fields = BTreeMap<String, Value>;

/// A single log entry on its way to the sinks
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    /// Timestamp of the log entry
    pub timestamp: DateTime<Local>,

    /// Log level
    pub level: LogLevel,

    /// Layer the entry was logged to
    pub layer: String,

    /// Log message
    pub message: String,

    /// Additional structured fields
    #[serde(flatten)]
    pub fields: Fields,
}

impl LogEntry {
    /// Create a new log entry
    pub fn new(level: LogLevel, layer: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            layer: layer.into(),
            message: message.into(),
            fields: Fields::new(),
        }
    }

    /// Builder: add a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.into(), v);
        }
        self
    }

    /// Add multiple fields
    pub fn with_fields(mut self, fields: Fields) -> Self {
        self.fields.extend(fields);
        self
    }
}

/// Log formatter trait
pub trait LogFormatter: Send + Sync {
    /// Format a log entry to a single line (without the trailing newline)
    fn format(&self, entry: &LogEntry) -> LogResult<String>;

    /// Get the format type
    fn format_type(&self) -> OutputFormat;
}

fn field_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape CR and LF so a record always occupies one physical line
pub fn escape_line_breaks(text: &str) -> Cow<'_, str> {
    if !text.contains(['\n', '\r']) {
        return Cow::Borrowed(text);
    }
    let mut escaped = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        match c {
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    Cow::Owned(escaped)
}

/// Substitute `{key}` placeholders in one pass, so substituted text is
/// never rescanned.
fn render_template<F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len() + 64);
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let key = &after[..close];
                match lookup(key) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(key);
                        out.push('}');
                    },
                }
                rest = &after[close + 1..];
            },
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            },
        }
    }
    out.push_str(rest);
    out
}

/// Plain or colored text formatter driven by the environment layout
#[derive(Debug)]
pub struct TextFormatter {
    /// Layout and colors
    layout: Arc<EnvOverrides>,

    /// Include colors (ANSI)
    colors: bool,
}

impl TextFormatter {
    /// Create a new text formatter
    pub fn new(layout: Arc<EnvOverrides>) -> Self {
        Self {
            layout,
            colors: false,
        }
    }

    /// Create a formatter with colors
    pub fn with_colors(layout: Arc<EnvOverrides>) -> Self {
        Self {
            layout,
            colors: true,
        }
    }

    fn paint(&self, color: &str, text: &str) -> String {
        if self.colors {
            format!("{}{}{}", color, text, self.layout.reset())
        } else {
            text.to_string()
        }
    }
}

impl LogFormatter for TextFormatter {
    fn format(&self, entry: &LogEntry) -> LogResult<String> {
        let layout = &self.layout;
        let name = render_template(&layout.name_format, |key| {
            (key == "name").then(|| entry.layer.clone())
        });

        let mut line = render_template(&layout.message_format, |key| match key {
            "date" => Some(entry.timestamp.format(&layout.date_format).to_string()),
            "time" => Some(entry.timestamp.format(&layout.time_format).to_string()),
            "level" => Some(self.paint(layout.level_color(entry.level), entry.level.as_str())),
            "name" => Some(self.paint(&layout.layer_color, &name)),
            "message" => Some(entry.message.clone()),
            _ => None,
        });

        if !entry.fields.is_empty() {
            let fields: Vec<String> = entry
                .fields
                .iter()
                .map(|(k, v)| format!("{}={}", k, field_text(v)))
                .collect();
            line.push(' ');
            line.push_str(&fields.join(" "));
        }

        Ok(escape_line_breaks(&line).into_owned())
    }

    fn format_type(&self) -> OutputFormat {
        if self.colors {
            OutputFormat::ColoredText
        } else {
            OutputFormat::Text
        }
    }
}

/// JSON log formatter, one object per line
#[derive(Debug, Default)]
pub struct JsonFormatter;

impl LogFormatter for JsonFormatter {
    fn format(&self, entry: &LogEntry) -> LogResult<String> {
        let mut object = Map::new();
        object.insert("timestamp".into(), Value::String(entry.timestamp.to_rfc3339()));
        object.insert("level".into(), Value::String(entry.level.as_str().into()));
        object.insert("layer".into(), Value::String(entry.layer.clone()));
        object.insert("message".into(), Value::String(entry.message.clone()));
        for (key, value) in &entry.fields {
            object.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    fn format_type(&self) -> OutputFormat {
        OutputFormat::Json
    }
}

/// CSV formatter: `timestamp,level,layer,message,fields`
#[derive(Debug, Default)]
pub struct CsvFormatter;

impl CsvFormatter {
    fn quote(value: &str) -> String {
        if value.contains([',', '"', '\n', '\r']) {
            format!("\"{}\"", value.replace('"', "\"\""))
        } else {
            value.to_string()
        }
    }
}

impl LogFormatter for CsvFormatter {
    fn format(&self, entry: &LogEntry) -> LogResult<String> {
        let fields = if entry.fields.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&entry.fields)?
        };

        Ok([
            entry.timestamp.to_rfc3339(),
            entry.level.as_str().to_string(),
            entry.layer.clone(),
            entry.message.clone(),
            fields,
        ]
        .iter()
        .map(|v| Self::quote(&escape_line_breaks(v)))
        .collect::<Vec<_>>()
        .join(","))
    }

    fn format_type(&self) -> OutputFormat {
        OutputFormat::Csv
    }
}

/// RFC 5424 syslog line formatter
#[derive(Debug)]
pub struct SyslogFormatter {
    /// Hostname field
    hostname: String,

    /// APP-NAME field
    app_name: String,

    /// Facility code (1 = user-level)
    facility: u8,
}

impl Default for SyslogFormatter {
    fn default() -> Self {
        Self {
            hostname: hostname(),
            app_name: "layerlog".to_string(),
            facility: 1,
        }
    }
}

impl SyslogFormatter {
    /// Create a formatter with an explicit facility
    pub fn with_facility(facility: u8) -> Self {
        Self {
            facility,
            ..Self::default()
        }
    }

    fn escape_param(value: &str) -> String {
        value
            .replace('\\', "\\\\")
            .replace('"', "\\\"")
            .replace(']', "\\]")
    }
}

impl LogFormatter for SyslogFormatter {
    fn format(&self, entry: &LogEntry) -> LogResult<String> {
        let priority = u16::from(self.facility) * 8 + u16::from(entry.level.syslog_severity());
        let msgid = if entry.layer.is_empty() { "-" } else { entry.layer.as_str() };

        let structured = if entry.fields.is_empty() {
            "-".to_string()
        } else {
            let params: Vec<String> = entry
                .fields
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, Self::escape_param(&field_text(v))))
                .collect();
            format!("[fields {}]", params.join(" "))
        };

        Ok(format!(
            "<{}>1 {} {} {} {} {} {} {}",
            priority,
            entry.timestamp.to_rfc3339(),
            self.hostname,
            self.app_name,
            std::process::id(),
            msgid,
            structured,
            entry.message.replace(['\n', '\r'], " ")
        ))
    }

    fn format_type(&self) -> OutputFormat {
        OutputFormat::Syslog
    }
}

/// Graylog extended log format (GELF 1.1) formatter
#[derive(Debug)]
pub struct GelfFormatter {
    /// Source host
    host: String,
}

impl Default for GelfFormatter {
    fn default() -> Self {
        Self { host: hostname() }
    }
}

impl LogFormatter for GelfFormatter {
    fn format(&self, entry: &LogEntry) -> LogResult<String> {
        let timestamp = entry.timestamp.timestamp_millis() as f64 / 1000.0;

        let mut object = Map::new();
        object.insert("version".into(), Value::from("1.1"));
        object.insert("host".into(), Value::String(self.host.clone()));
        object.insert("short_message".into(), Value::String(entry.message.clone()));
        object.insert("timestamp".into(), Value::from(timestamp));
        object.insert("level".into(), Value::from(entry.level.syslog_severity()));
        object.insert("_layer".into(), Value::String(entry.layer.clone()));
        for (key, value) in &entry.fields {
            // "_id" is reserved by GELF
            let name = if key == "id" {
                "_field_id".to_string()
            } else {
                format!("_{key}")
            };
            object.entry(name).or_insert_with(|| value.clone());
        }
        Ok(serde_json::to_string(&Value::Object(object))?)
    }

    fn format_type(&self) -> OutputFormat {
        OutputFormat::Gelf
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

/// Create a formatter for the given format type.
///
/// `colors` only matters for [`OutputFormat::ColoredText`]; when false the
/// colored format renders as plain text.
pub fn create_formatter(
    format: OutputFormat,
    layout: &Arc<EnvOverrides>,
    colors: bool,
) -> Box<dyn LogFormatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter::new(Arc::clone(layout))),
        OutputFormat::ColoredText if colors => Box::new(TextFormatter::with_colors(Arc::clone(layout))),
        OutputFormat::ColoredText => Box::new(TextFormatter::new(Arc::clone(layout))),
        OutputFormat::Json => Box::new(JsonFormatter),
        OutputFormat::Csv => Box::new(CsvFormatter),
        OutputFormat::Syslog => Box::new(SyslogFormatter::default()),
        OutputFormat::Gelf => Box::new(GelfFormatter::default()),
    }
}
