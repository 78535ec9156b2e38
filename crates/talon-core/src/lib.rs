//! Talon Core - Foundation types for the Talon SIEM tool-server.
//!
//! This crate provides:
//! - Identifier newtypes shared across the server (sessions, connections, keys)
//! - Permission model for api-key scoping
//! - The error taxonomy with stable JSON-RPC error codes
//! - Error aggregation for the analytics tool
//! - Retry utilities with exponential backoff
//! - The per-request context carrying correlation id and cancellation

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod analytics;
pub mod ctx;
pub mod error;
pub mod retry;
pub mod types;

pub use analytics::{ErrorAnalytics, ErrorRecord, ErrorReport, ErrorTrend};
pub use ctx::RequestCtx;
pub use error::{ErrorCode, FieldError, ServerError, ServerResult};
pub use retry::{RetryConfig, retry};
pub use types::{
    ConnectionId, CorrelationId, KeyId, Permission, PermissionSet, SessionId, ToolCategory,
};
