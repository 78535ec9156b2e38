//! Talon Health - backend probing and feature availability.
//!
//! This crate provides:
//! - The static feature → backend-dependency map
//! - The periodic prober with a hard per-probe timeout
//! - `is_available()` / `snapshot()` consulted by the tool registry
//!
//! Features never fail startup: an unhealthy backend only hides the tools
//! that depend on it, and the next probe round can bring them back.
//! Availability transitions emit structured log events.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod features;
mod manager;

pub use features::{FEATURES, FeatureSpec};
pub use manager::{BackendHealth, FeatureManager, HealthProbe, HealthSnapshot};
