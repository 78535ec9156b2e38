//! Per-request context: correlation id, session binding, cancellation.
//!
//! Every tool handler takes a [`RequestCtx`] as its first parameter and must
//! propagate `cancel` to all I/O it initiates. The token is a child of the
//! connection token, which is itself a child of the server shutdown token,
//! so cancelling any ancestor cancels the request.

use tokio_util::sync::CancellationToken;

use crate::types::{CorrelationId, SessionId};

/// Context carried through a single request's lifetime.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    /// Correlation id for log tracing.
    pub correlation_id: CorrelationId,
    /// The authenticated session, when one exists.
    pub session_id: Option<SessionId>,
    /// Cancellation token for this request.
    pub cancel: CancellationToken,
}

impl RequestCtx {
    /// Create a context for an authenticated request.
    #[must_use]
    pub fn new(session_id: SessionId, cancel: CancellationToken) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            session_id: Some(session_id),
            cancel,
        }
    }

    /// Create a context with no session (pre-auth methods).
    #[must_use]
    pub fn unauthenticated(cancel: CancellationToken) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            session_id: None,
            cancel,
        }
    }

    /// A detached context for tests and internal maintenance work.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            session_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Whether the request has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_token_observes_parent_cancel() {
        let parent = CancellationToken::new();
        let ctx = RequestCtx::unauthenticated(parent.child_token());
        assert!(!ctx.is_cancelled());
        parent.cancel();
        assert!(ctx.is_cancelled());
    }
}
