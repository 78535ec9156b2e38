//! Talon Config - Configuration for the Talon SIEM tool-server.
//!
//! This crate provides:
//! - The typed YAML configuration tree with embedded defaults
//! - `TALON_*` environment variable overrides (env > file > default)
//! - `vault://` secret resolution through the external vault CLI
//! - Post-merge validation
//!
//! Configuration is loaded once at startup and is immutable afterwards;
//! components receive it (or their slice of it) by value at construction.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod env;
pub mod error;
pub mod loader;
pub mod secrets;
pub mod types;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::load;
pub use secrets::SecretResolver;
pub use types::{
    ApiKeyConfig, AuthConfig, AuthDefaultsConfig, CircuitBreakerConfig, Config,
    ElasticsearchConfig, ErrorAggregationConfig, ErrorHandlingConfig, FallbackStrategy,
    HealthConfig, QueryConfig, ReportConfig, RetryPolicyConfig, SecretsConfig, ServerConfig,
    StreamingConfig, TcpConfig, ThreatIntelConfig, TimeoutsConfig, TransportConfig, TransportMode,
};
