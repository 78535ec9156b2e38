//! Configuration error types.

use thiserror::Error;

/// Errors during config load, merge, secret resolution, or validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file could not be read.
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// The offending path.
        path: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A config file is not valid YAML.
    #[error("cannot parse {path}: {source}")]
    Parse {
        /// The offending path.
        path: String,
        /// The YAML failure.
        #[source]
        source: serde_yaml::Error,
    },

    /// The merged tree does not deserialize into the typed config.
    #[error("invalid configuration: {0}")]
    Shape(serde_yaml::Error),

    /// An environment override does not parse as the expected scalar type.
    #[error("environment override {var} is not a valid {expected}: {value}")]
    BadOverride {
        /// The environment variable name.
        var: String,
        /// Expected scalar type.
        expected: &'static str,
        /// The rejected value.
        value: String,
    },

    /// A required `vault://` secret could not be resolved.
    #[error("cannot resolve required secret {reference}: {detail}")]
    SecretResolution {
        /// The `vault://` reference.
        reference: String,
        /// Sanitized failure detail.
        detail: String,
    },

    /// Validation failed after the merge.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
