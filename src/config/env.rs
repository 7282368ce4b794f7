//! Environment overrides for colors and text layout

use super::types::LogLevel;
use chrono::format::{Item, StrftimeItems};
use std::collections::HashMap;

/// Prefix shared by every override variable
pub const ENV_PREFIX: &str = "LAYERLOG_";

const RESET: &str = "\x1b[0m";

/// Process-wide presentation overrides, read once when a logger is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvOverrides {
    /// ANSI escape per level
    pub level_colors: HashMap<LogLevel, String>,
    /// ANSI escape for the layer name
    pub layer_color: String,
    /// Color even when not writing to a terminal
    pub force_color: bool,
    /// Never color
    pub disable_color: bool,
    /// strftime date format
    pub date_format: String,
    /// strftime time format
    pub time_format: String,
    /// Layer name template, `{name}` is substituted
    pub name_format: String,
    /// Line template with `{date}`, `{time}`, `{level}`, `{name}`, `{message}`
    pub message_format: String,
}

impl Default for EnvOverrides {
    fn default() -> Self {
        let level_colors = LogLevel::ALL
            .iter()
            .map(|level| (*level, default_level_color(*level).to_string()))
            .collect();

        Self {
            level_colors,
            layer_color: "\x1b[34m".to_string(),
            force_color: false,
            disable_color: false,
            date_format: "%Y-%m-%d".to_string(),
            time_format: "%H:%M:%S%.3f".to_string(),
            name_format: "[{name}]".to_string(),
            message_format: "{date} {time} [{level}] {name} {message}".to_string(),
        }
    }
}

fn default_level_color(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "\x1b[36m",    // cyan
        LogLevel::Info => "\x1b[32m",     // green
        LogLevel::Warning => "\x1b[33m",  // yellow
        LogLevel::Error => "\x1b[31m",    // red
        LogLevel::Critical => "\x1b[1;35m", // bold magenta
    }
}

impl EnvOverrides {
    /// Read overrides from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary lookup function
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut overrides = Self::default();
        let var = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}")).filter(|value| !value.trim().is_empty())
        };

        for level in LogLevel::ALL {
            if let Some(code) = var(&format!("COLOR_{}", level.as_str())).and_then(|v| ansi_code(&v)) {
                overrides.level_colors.insert(level, code);
            }
        }
        if let Some(code) = var("COLOR_LAYER").and_then(|v| ansi_code(&v)) {
            overrides.layer_color = code;
        }

        overrides.force_color = var("FORCE_COLOR").is_some_and(|v| is_truthy(&v));
        overrides.disable_color = var("NO_COLOR").is_some_and(|v| is_truthy(&v))
            || lookup("NO_COLOR").is_some_and(|v| !v.is_empty());

        if let Some(fmt) = var("DATE_FORMAT").filter(|f| is_valid_strftime(f)) {
            overrides.date_format = fmt;
        }
        if let Some(fmt) = var("TIME_FORMAT").filter(|f| is_valid_strftime(f)) {
            overrides.time_format = fmt;
        }
        if let Some(fmt) = var("NAME_FORMAT") {
            overrides.name_format = fmt;
        }
        if let Some(fmt) = var("MESSAGE_FORMAT") {
            overrides.message_format = fmt;
        }

        overrides
    }

    /// Escape sequence for a level
    pub fn level_color(&self, level: LogLevel) -> &str {
        self.level_colors
            .get(&level)
            .map(String::as_str)
            .unwrap_or_else(|| default_level_color(level))
    }

    /// Reset sequence
    pub fn reset(&self) -> &'static str {
        RESET
    }

    /// Decide whether a stream should be colored
    pub fn colors_enabled(&self, mode: super::types::ColorMode, is_terminal: bool) -> bool {
        use super::types::ColorMode;

        if self.disable_color {
            return false;
        }
        match mode {
            ColorMode::Never => false,
            ColorMode::Always => true,
            ColorMode::Auto => self.force_color || is_terminal,
        }
    }
}

/// chrono panics when rendering a malformed format string, so bad
/// overrides are ignored up front.
fn is_valid_strftime(fmt: &str) -> bool {
    !StrftimeItems::new(fmt).any(|item| matches!(item, Item::Error))
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Turn a color name or raw SGR parameters ("31", "1;35") into an escape
fn ansi_code(value: &str) -> Option<String> {
    let value = value.trim().to_ascii_lowercase();
    let code = match value.as_str() {
        "black" => "30",
        "red" => "31",
        "green" => "32",
        "yellow" => "33",
        "blue" => "34",
        "magenta" => "35",
        "cyan" => "36",
        "white" => "37",
        "bold" => "1",
        other if !other.is_empty() && other.chars().all(|c| c.is_ascii_digit() || c == ';') => {
            other
        },
        _ => return None,
    };
    Some(format!("\x1b[{code}m"))
}
