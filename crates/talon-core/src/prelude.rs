//! Convenience re-exports for downstream crates.

pub use crate::analytics::{ErrorAnalytics, ErrorRecord, ErrorReport, ErrorTrend};
pub use crate::ctx::RequestCtx;
pub use crate::error::{ErrorCode, FieldError, ServerError, ServerResult};
pub use crate::retry::{RetryConfig, retry};
pub use crate::types::{
    ConnectionId, CorrelationId, KeyId, Permission, PermissionSet, SessionId, ToolCategory,
};
