//! Telemetry error types.

use thiserror::Error;

/// Errors from logging setup.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level or directive string could not be parsed.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    /// A global subscriber was already installed.
    #[error("logging already initialized")]
    AlreadyInitialized,
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
