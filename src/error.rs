//! Logging error types

use std::io;
use thiserror::Error;

/// Result type for logging operations
pub type LogResult<T> = Result<T, LogError>;

/// Logging errors.
///
/// Only `Configuration`, `Validation` and `UnknownLevel` ever reach callers of
/// the public API. I/O failures are contained at the sink boundary and routed
/// to the error tracker instead.
#[derive(Debug, Error)]
pub enum LogError {
    /// Malformed layer or destination spec, or a reserved layer name.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Bad input to a single operation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Severity name that does not map to a level.
    #[error("unknown log level: {0}")]
    UnknownLevel(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl LogError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Shorthand for a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<serde_json::Error> for LogError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for LogError {
    fn from(err: toml::de::Error) -> Self {
        Self::Configuration(format!("failed to parse TOML: {err}"))
    }
}
