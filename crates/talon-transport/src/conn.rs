//! Connection registry and the transport event surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use talon_core::ConnectionId;

use crate::error::{TransportError, TransportResult};

/// Limits applied to every connection.
#[derive(Debug, Clone, Copy)]
pub struct TransportLimits {
    /// Maximum frame size in bytes.
    pub max_frame_bytes: usize,
    /// Concurrent in-flight requests per connection; further reads stall.
    pub max_in_flight: usize,
    /// Idle expiry for TCP connections, in seconds.
    pub idle_timeout_seconds: u64,
}

impl Default for TransportLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            max_in_flight: 16,
            idle_timeout_seconds: 300,
        }
    }
}

/// Events delivered from a transport to the server facade.
#[derive(Debug)]
pub enum TransportEvent {
    /// A peer connected.
    Connected {
        /// The new connection.
        connection: ConnectionId,
        /// Peer address (`"stdio"` for the stdio transport).
        peer: String,
    },
    /// One complete inbound frame.
    Frame {
        /// The source connection.
        connection: ConnectionId,
        /// Raw frame payload (JSON bytes).
        payload: Vec<u8>,
        /// In-flight slot; dropping it lets the read loop accept another
        /// frame from this connection.
        permit: OwnedSemaphorePermit,
    },
    /// A connection ended (peer close, idle expiry, framing violation).
    Disconnected {
        /// The closed connection.
        connection: ConnectionId,
    },
}

/// Per-connection state held by the registry.
pub(crate) struct ConnEntry {
    pub(crate) outbound: mpsc::Sender<Vec<u8>>,
    pub(crate) cancel: CancellationToken,
    pub(crate) in_flight: Arc<Semaphore>,
}

/// Shared handle for sending frames and closing connections.
///
/// Cloneable; both transports hand one to the server facade.
#[derive(Clone)]
pub struct TransportHandle {
    pub(crate) connections: Arc<DashMap<ConnectionId, ConnEntry>>,
    next_id: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl TransportHandle {
    pub(crate) fn new(shutdown: CancellationToken) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            shutdown,
        }
    }

    pub(crate) fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn register(&self, id: ConnectionId, entry: ConnEntry) {
        self.connections.insert(id, entry);
    }

    pub(crate) fn deregister(&self, id: ConnectionId) {
        if let Some((_, entry)) = self.connections.remove(&id) {
            entry.cancel.cancel();
        }
    }

    /// Queue one outbound frame. Awaits queue capacity (one frame is
    /// written to the wire at a time).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::UnknownConnection`] if the connection is
    /// gone, or [`TransportError::Closed`] if its writer has stopped.
    pub async fn send(&self, connection: ConnectionId, frame: Vec<u8>) -> TransportResult<()> {
        let sender = self
            .connections
            .get(&connection)
            .map(|entry| entry.outbound.clone())
            .ok_or(TransportError::UnknownConnection(connection))?;
        sender
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed(connection))
    }

    /// Close one connection.
    pub fn close(&self, connection: ConnectionId) {
        self.deregister(connection);
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Token cancelled when the transport shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        for id in ids {
            self.deregister(id);
        }
    }
}

impl std::fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportHandle")
            .field("connections", &self.connections.len())
            .finish_non_exhaustive()
    }
}
