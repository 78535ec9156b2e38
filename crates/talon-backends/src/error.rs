//! Backend error taxonomy.
//!
//! Every adapter failure is one of these variants. Two classifications
//! drive the resilience machinery:
//!
//! - [`BackendError::is_matched_failure`] feeds the circuit breaker:
//!   connection errors, timeouts, and 5xx responses trip it; validation
//!   errors and not-found do not.
//! - [`BackendError::is_transient`] feeds the retry policy for idempotent
//!   GET-shaped calls.

use thiserror::Error;

use talon_core::ServerError;

/// Failures from backend adapters.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Could not reach the backend at all.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend did not answer within the deadline.
    #[error("backend timed out after {seconds}s")]
    Timeout {
        /// The deadline that was exceeded.
        seconds: u64,
    },

    /// Non-2xx HTTP response.
    #[error("backend returned status {code}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Sanitized response detail.
        detail: String,
    },

    /// The response body did not decode.
    #[error("cannot decode backend response: {0}")]
    Decode(String),

    /// The backend reports the entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request was malformed from the backend's point of view.
    #[error("backend rejected request: {0}")]
    Validation(String),

    /// The vendor-side rate budget is exhausted.
    #[error("vendor rate limit exhausted")]
    VendorRateLimited {
        /// Seconds until the vendor bucket refills.
        retry_after_seconds: u64,
    },

    /// The request was cancelled while I/O was in flight.
    #[error("cancelled")]
    Cancelled,

    /// The typesetter subprocess failed.
    #[error("render failed: {0}")]
    Render(String),

    /// The typesetter produced more output than allowed.
    #[error("render output of {size} bytes exceeds cap of {max} bytes")]
    OutputTooLarge {
        /// Observed output size.
        size: u64,
        /// Configured cap.
        max: u64,
    },
}

impl BackendError {
    /// Whether this failure counts against the circuit breaker.
    #[must_use]
    pub const fn is_matched_failure(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Status { code, .. } => *code >= 500,
            Self::Decode(_)
            | Self::NotFound(_)
            | Self::Validation(_)
            | Self::VendorRateLimited { .. }
            | Self::Cancelled
            | Self::Render(_)
            | Self::OutputTooLarge { .. } => false,
        }
    }

    /// Whether a retry of an idempotent call may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout { .. } => true,
            Self::Status { code, .. } => matches!(code, 502 | 503 | 504 | 429),
            _ => false,
        }
    }

    /// Translate into the wire-level error, naming the failing service.
    #[must_use]
    pub fn into_server_error(self, service: &str) -> ServerError {
        match self {
            Self::Timeout { seconds } => ServerError::Timeout {
                timeout_seconds: seconds,
            },
            Self::NotFound(what) => ServerError::ResourceNotFound { resource: what },
            Self::Validation(detail) => ServerError::validation("query", detail),
            Self::Cancelled => ServerError::Internal("request cancelled".to_owned()),
            other => ServerError::ExternalService {
                service: service.to_owned(),
                detail: other.to_string(),
            },
        }
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matched_failures() {
        assert!(BackendError::Connection("refused".into()).is_matched_failure());
        assert!(BackendError::Timeout { seconds: 30 }.is_matched_failure());
        assert!(
            BackendError::Status {
                code: 503,
                detail: String::new()
            }
            .is_matched_failure()
        );
        assert!(
            !BackendError::Status {
                code: 404,
                detail: String::new()
            }
            .is_matched_failure()
        );
        assert!(!BackendError::Validation("bad query".into()).is_matched_failure());
        assert!(!BackendError::NotFound("doc".into()).is_matched_failure());
    }

    #[test]
    fn test_transient_subset() {
        assert!(BackendError::Connection("reset".into()).is_transient());
        assert!(
            BackendError::Status {
                code: 503,
                detail: String::new()
            }
            .is_transient()
        );
        assert!(
            !BackendError::Status {
                code: 500,
                detail: String::new()
            }
            .is_transient()
        );
        assert!(!BackendError::Cancelled.is_transient());
    }

    #[test]
    fn test_server_error_mapping() {
        let err = BackendError::Connection("refused".into()).into_server_error("elasticsearch");
        assert_eq!(err.code().code(), -32000);
        assert_eq!(err.data()["service"], "elasticsearch");

        let err = BackendError::Timeout { seconds: 30 }.into_server_error("elasticsearch");
        assert_eq!(err.code().code(), -32005);
    }
}
