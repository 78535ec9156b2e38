//! Talon Server - the assembled JSON-RPC tool-server.
//!
//! This crate provides:
//! - JSON-RPC 2.0 frame parsing and response building
//! - Method routing (`initialize`, `authenticate`, `tools/*`,
//!   `resources/*`)
//! - The server facade: component assembly, per-request tasks with
//!   cancellation, rate-limit and auth gating, graceful shutdown
//! - The built-in monitoring tools and the read-only metrics snapshot

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod metrics;
mod monitoring;
pub mod rpc;
mod server;

pub use metrics::{Metrics, MetricsState, ToolStats};
pub use monitoring::{
    BreakerStatusTool, DataDictionaryTool, ErrorAnalyticsTool, GenerateReportTool,
    HealthStatusTool,
};
pub use server::{Backends, Server};
