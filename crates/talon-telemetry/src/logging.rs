//! Logging configuration and subscriber installation.

use tracing_subscriber::EnvFilter;

use crate::error::{TelemetryError, TelemetryResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable multi-line output for local runs.
    Pretty,
    /// One compact line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON for log shippers.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base level filter (e.g. `info`, `debug`).
    level: String,
    /// Extra per-target directives (e.g. `talon_query=debug`).
    directives: Vec<String>,
    /// Output format.
    format: LogFormat,
}

impl LogConfig {
    /// Create a config with the given base level.
    #[must_use]
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            directives: Vec::new(),
            format: LogFormat::default(),
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Add a per-target directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn filter(&self) -> TelemetryResult<EnvFilter> {
        let mut spec = self.level.clone();
        for directive in &self.directives {
            spec.push(',');
            spec.push_str(directive);
        }
        spec.parse::<EnvFilter>()
            .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))
    }
}

/// Install the global tracing subscriber.
///
/// Writes to stderr; stdout belongs to the stdio transport.
///
/// # Errors
///
/// Returns an error if the filter is malformed or a subscriber is already
/// installed.
pub fn setup_logging(config: &LogConfig) -> TelemetryResult<()> {
    // RUST_LOG wins over the configured spec when set.
    let filter = match std::env::var("RUST_LOG") {
        Ok(spec) => spec
            .parse::<EnvFilter>()
            .map_err(|e| TelemetryError::InvalidFilter(e.to_string()))?,
        Err(_) => config.filter()?,
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let result = match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

/// Install a default `info`-level compact subscriber.
///
/// # Errors
///
/// Returns an error if a subscriber is already installed.
pub fn setup_default_logging() -> TelemetryResult<()> {
    setup_logging(&LogConfig::new("info"))
}
