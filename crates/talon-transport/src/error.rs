//! Transport error types.

use thiserror::Error;

use talon_core::ConnectionId;

/// Errors from transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The TCP listener could not bind.
    #[error("cannot bind {address}: {source}")]
    Bind {
        /// The address that failed to bind.
        address: String,
        /// The underlying failure.
        #[source]
        source: std::io::Error,
    },

    /// An inbound frame exceeded the configured maximum.
    #[error("frame of {size} bytes exceeds maximum {max} bytes")]
    MessageSizeExceeded {
        /// Declared or observed frame size.
        size: usize,
        /// Configured cap.
        max: usize,
    },

    /// I/O failure on a connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Send to a connection that no longer exists.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's outbound queue is gone (peer disconnected).
    #[error("connection {0} closed")]
    Closed(ConnectionId),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
