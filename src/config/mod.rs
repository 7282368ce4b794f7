//! # Configuration
//!
//! Typed configuration for layers and destinations, with TOML/JSON loading,
//! validation, size parsing and environment overrides.
//!
//! ## Example Configuration
//!
//! ```toml
//! default_level = "INFO"
//!
//! [layers.DEFAULT]
//! level = "DEBUG"
//!
//! [[layers.DEFAULT.destinations]]
//! type = "console"
//! format = "colored-text"
//!
//! [[layers.DEFAULT.destinations]]
//! type = "file"
//! path = "logs/app.log"
//! max_size = "5MB"
//! backup_count = 3
//! ```

mod env;
mod loader;
mod size;
mod types;
mod validation;

pub use env::{EnvOverrides, ENV_PREFIX};
pub use loader::ConfigLoader;
pub use size::parse_size;
pub use types::{
    is_reserved_name, ColorMode, DestinationKind, DestinationSpec, FileSettings, LayerConfig,
    LayerSpec, LogLevel, LoggerConfig, OutputFormat, CENTRALIZED_LAYER, DEFAULT_LAYER,
};
pub use validation::{
    run_validators, validate, DestinationValidator, LayerNameValidator, ValidationIssue,
    ValidationResult, ValidationSeverity, Validator,
};
