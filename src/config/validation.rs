//! Configuration validation system.

use super::types::{is_reserved_name, LoggerConfig, CENTRALIZED_LAYER};
use crate::error::{LogError, LogResult};

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// The field path that failed validation.
    pub field: String,
    /// Issue message.
    pub message: String,
    /// Severity level.
    pub severity: ValidationSeverity,
}

impl ValidationIssue {
    /// Create a new error.
    pub fn error(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }

    /// Create a new warning.
    pub fn warning(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            severity: ValidationSeverity::Warning,
        }
    }
}

/// Severity of validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationSeverity {
    /// Error - configuration is invalid.
    Error,
    /// Warning - configuration may have issues.
    Warning,
}

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty (valid) result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an issue to the result.
    pub fn add(&mut self, issue: ValidationIssue) {
        self.issues.push(issue);
    }

    /// Check if the validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self
            .issues
            .iter()
            .any(|e| e.severity == ValidationSeverity::Error)
    }

    /// Get all issues.
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Get only errors (not warnings).
    #[must_use]
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Error)
            .collect()
    }

    /// Get only warnings.
    #[must_use]
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|e| e.severity == ValidationSeverity::Warning)
            .collect()
    }

    /// Merge another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.issues.extend(other.issues);
    }
}

/// Trait for configuration validators.
pub trait Validator: std::fmt::Debug + Send + Sync {
    /// Validate a configuration and return any issues.
    fn validate(&self, config: &LoggerConfig) -> ValidationResult;
}

/// Rejects empty layer names and reserved `__NAME__` names other than
/// the centralized layer.
#[derive(Debug, Default)]
pub struct LayerNameValidator;

impl Validator for LayerNameValidator {
    fn validate(&self, config: &LoggerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        for name in config.layers.keys() {
            if name.trim().is_empty() {
                result.add(ValidationIssue::error("layers", "Layer name cannot be empty"));
            } else if is_reserved_name(name) && name != CENTRALIZED_LAYER {
                result.add(ValidationIssue::error(
                    format!("layers.{name}"),
                    format!("Layer name {name} uses the reserved __NAME__ pattern"),
                ));
            }
        }

        result
    }
}

/// Flags destinations that will not work as written.
///
/// These are warnings only: the sink factory degrades such destinations at
/// construction time instead of failing the whole configuration.
#[derive(Debug, Default)]
pub struct DestinationValidator;

impl Validator for DestinationValidator {
    fn validate(&self, config: &LoggerConfig) -> ValidationResult {
        let mut result = ValidationResult::new();

        for (name, layer) in &config.layers {
            if layer.destinations.is_empty() {
                result.add(ValidationIssue::warning(
                    format!("layers.{name}.destinations"),
                    "Layer has no destinations; its messages are dropped",
                ));
            }
            for (i, dest) in layer.destinations.iter().enumerate() {
                let field = format!("layers.{name}.destinations[{i}]");
                if dest.kind == super::types::DestinationKind::File && dest.path.is_none() {
                    result.add(ValidationIssue::warning(
                        format!("{field}.path"),
                        "File destination has no path",
                    ));
                }
                if super::types::OutputFormat::parse(&dest.format).is_none() {
                    result.add(ValidationIssue::warning(
                        format!("{field}.format"),
                        format!("Unknown format {:?}, text will be used", dest.format),
                    ));
                }
            }
        }

        result
    }
}

/// Run the built-in validators.
///
/// # Errors
///
/// Returns [`LogError::Configuration`] listing every error found. Warnings
/// are logged and do not fail validation.
pub fn validate(config: &LoggerConfig) -> LogResult<()> {
    let validators: [&dyn Validator; 2] = [&LayerNameValidator, &DestinationValidator];
    run_validators(config, &validators)
}

/// Run a set of validators against a configuration.
///
/// # Errors
///
/// Returns [`LogError::Configuration`] if any validator reports an error.
pub fn run_validators(config: &LoggerConfig, validators: &[&dyn Validator]) -> LogResult<()> {
    let mut result = ValidationResult::new();
    for validator in validators {
        result.merge(validator.validate(config));
    }

    for warning in result.warnings() {
        tracing::warn!(field = %warning.field, "{}", warning.message);
    }

    if !result.is_valid() {
        let errors: Vec<String> = result.errors().iter().map(|e| e.message.clone()).collect();
        return Err(LogError::Configuration(errors.join("; ")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DestinationSpec, LayerConfig};

    #[test]
    fn test_valid_config() {
        let config = LoggerConfig::new()
            .with_layer("DEFAULT", LayerConfig::new().with_destination(DestinationSpec::console()))
            .with_layer(CENTRALIZED_LAYER, LayerConfig::new());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_reserved_name_rejected() {
        let config = LoggerConfig::new().with_layer("__X__", LayerConfig::new());

        let result = LayerNameValidator.validate(&config);
        assert!(!result.is_valid());
        assert!(result.errors()[0].message.contains("reserved"));

        assert!(matches!(validate(&config), Err(LogError::Configuration(_))));
    }

    #[test]
    fn test_empty_name_rejected() {
        let config = LoggerConfig::new().with_layer("", LayerConfig::new());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_destination_issues_are_warnings() {
        let mut bad_file = DestinationSpec::file("x.log");
        bad_file.path = None;
        bad_file.format = "yaml".to_string();
        let config = LoggerConfig::new()
            .with_layer("app", LayerConfig::new().with_destination(bad_file))
            .with_layer("empty", LayerConfig::new());

        let result = DestinationValidator.validate(&config);
        assert!(result.is_valid());
        assert_eq!(result.warnings().len(), 3);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_validation_result_merge() {
        let mut result1 = ValidationResult::new();
        result1.add(ValidationIssue::error("field1", "error1"));

        let mut result2 = ValidationResult::new();
        result2.add(ValidationIssue::warning("field2", "warning1"));

        result1.merge(result2);
        assert_eq!(result1.issues().len(), 2);
        assert_eq!(result1.errors().len(), 1);
    }
}
