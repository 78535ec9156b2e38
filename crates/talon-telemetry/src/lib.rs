//! Talon Telemetry - Logging and tracing for the Talon SIEM tool-server.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats
//! - Integration with the tracing ecosystem
//!
//! Logs go to stderr so the stdio transport keeps stdout clean for
//! JSON-RPC frames.
//!
//! # Example
//!
//! ```rust,no_run
//! use talon_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), talon_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Json)
//!     .with_directive("talon_query=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("server starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, setup_default_logging, setup_logging};
