//! Configuration file loader.

use super::types::LoggerConfig;
use super::validation::{run_validators, DestinationValidator, LayerNameValidator, Validator};
use crate::error::{LogError, LogResult};
use std::path::Path;

/// Configuration loader with validation support.
///
/// The built-in layer-name and destination checks always run; extra
/// validators run after them.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Additional validators to run on loaded configuration.
    validators: Vec<Box<dyn Validator>>,
}

impl ConfigLoader {
    /// Create a new configuration loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validator to the loader.
    #[must_use]
    pub fn with_validator<V: Validator + 'static>(mut self, validator: V) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    /// Load configuration from a file path.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file does not exist or cannot be read
    /// - The content is malformed
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(&self, path: P) -> LogResult<LoggerConfig> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(LogError::config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            self.load_json_str(&content)
        } else {
            self.load_str(&content)
        }
    }

    /// Load configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    pub fn load_str(&self, content: &str) -> LogResult<LoggerConfig> {
        let config: LoggerConfig = toml::from_str(content)?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or validation fails.
    pub fn load_json_str(&self, content: &str) -> LogResult<LoggerConfig> {
        let config: LoggerConfig = serde_json::from_str(content)
            .map_err(|e| LogError::config(format!("failed to parse JSON: {e}")))?;
        self.validate(&config)?;
        Ok(config)
    }

    /// Validate a configuration against all registered validators.
    fn validate(&self, config: &LoggerConfig) -> LogResult<()> {
        let mut validators: Vec<&dyn Validator> = vec![&LayerNameValidator, &DestinationValidator];
        validators.extend(self.validators.iter().map(|v| v.as_ref()));
        run_validators(config, &validators)
    }
}
