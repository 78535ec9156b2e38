//! TCP transport: length-prefixed frames over many connections.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use talon_core::ConnectionId;

use crate::conn::{ConnEntry, TransportEvent, TransportHandle, TransportLimits};
use crate::error::{TransportError, TransportResult};
use crate::frame::{read_length_prefixed, write_length_prefixed};

/// Capacity of the event channel to the server facade.
const EVENT_QUEUE: usize = 256;

/// Capacity of each connection's outbound frame queue.
const OUTBOUND_QUEUE: usize = 32;

/// TCP listener transport.
pub struct TcpTransport {
    bind: String,
    port: u16,
    max_connections: usize,
    limits: TransportLimits,
    handle: TransportHandle,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl TcpTransport {
    /// Create the transport and the event receiver the server reads from.
    #[must_use]
    pub fn new(
        bind: impl Into<String>,
        port: u16,
        max_connections: usize,
        limits: TransportLimits,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let transport = Self {
            bind: bind.into(),
            port,
            max_connections,
            limits,
            handle: TransportHandle::new(CancellationToken::new()),
            events_tx,
        };
        (transport, events_rx)
    }

    /// The shared send/close handle.
    #[must_use]
    pub fn handle(&self) -> TransportHandle {
        self.handle.clone()
    }

    /// Bind the listener, spawn the accept loop, and return the bound
    /// address (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] when the address cannot be bound —
    /// an unrecoverable startup failure.
    pub async fn start(&self) -> TransportResult<std::net::SocketAddr> {
        let address = format!("{}:{}", self.bind, self.port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| TransportError::Bind {
                address: address.clone(),
                source,
            })?;
        let bound = listener.local_addr().map_err(|source| TransportError::Bind {
            address: address.clone(),
            source,
        })?;
        tracing::info!(address = %bound, "tcp transport listening");

        let handle = self.handle.clone();
        let events = self.events_tx.clone();
        let limits = self.limits;
        let max_connections = self.max_connections;
        let shutdown = handle.shutdown_token();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    () = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, peer)) => {
                        if handle.connection_count() >= max_connections {
                            tracing::warn!(%peer, "connection limit reached, refusing");
                            drop(stream);
                            continue;
                        }
                        let (read_half, write_half) = stream.into_split();
                        spawn_connection(
                            &handle,
                            &events,
                            limits,
                            peer.to_string(),
                            read_half,
                            write_half,
                            true,
                        );
                    },
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    },
                }
            }
            tracing::info!("tcp accept loop stopped");
        });
        Ok(bound)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("bind", &self.bind)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}

/// Register a connection and spawn its read and write tasks.
///
/// Shared by the TCP transport and the tests (which drive in-memory
/// streams through the same paths).
pub(crate) fn spawn_connection<R, W>(
    handle: &TransportHandle,
    events: &mpsc::Sender<TransportEvent>,
    limits: TransportLimits,
    peer: String,
    read_half: R,
    write_half: W,
    enforce_idle: bool,
) -> ConnectionId
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = handle.allocate_id();
    let cancel = CancellationToken::new();
    let in_flight = Arc::new(Semaphore::new(limits.max_in_flight));
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);

    handle.register(
        id,
        ConnEntry {
            outbound: outbound_tx,
            cancel: cancel.clone(),
            in_flight: Arc::clone(&in_flight),
        },
    );

    // Writer: drains the outbound queue, one frame on the wire at a time.
    let writer_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut writer = BufWriter::new(write_half);
        loop {
            let frame = tokio::select! {
                () = writer_cancel.cancelled() => break,
                frame = outbound_rx.recv() => frame,
            };
            let Some(frame) = frame else { break };
            if let Err(e) = write_length_prefixed(&mut writer, &frame).await {
                tracing::debug!(connection = %id, error = %e, "write failed");
                break;
            }
        }
    });

    // Reader: backpressured by the in-flight semaphore.
    let reader_handle = handle.clone();
    let reader_events = events.clone();
    tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        let idle = Duration::from_secs(limits.idle_timeout_seconds.max(1));
        let _ = reader_events
            .send(TransportEvent::Connected {
                connection: id,
                peer,
            })
            .await;

        loop {
            // Acquiring before reading is the backpressure point: once the
            // connection has max_in_flight unanswered requests, the read
            // loop stalls here and the kernel buffer fills.
            let permit = tokio::select! {
                () = cancel.cancelled() => break,
                permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };

            let frame = if enforce_idle {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = tokio::time::timeout(
                        idle,
                        read_length_prefixed(&mut reader, limits.max_frame_bytes),
                    ) => match result {
                        Ok(inner) => inner,
                        Err(_) => {
                            tracing::info!(connection = %id, "idle timeout, closing");
                            break;
                        },
                    },
                }
            } else {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    result = read_length_prefixed(&mut reader, limits.max_frame_bytes) => result,
                }
            };

            match frame {
                Ok(Some(payload)) => {
                    if reader_events
                        .send(TransportEvent::Frame {
                            connection: id,
                            payload,
                            permit,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                },
                Ok(None) => break,
                Err(TransportError::MessageSizeExceeded { size, max }) => {
                    tracing::warn!(
                        connection = %id,
                        size,
                        max,
                        "MESSAGE_SIZE_EXCEEDED, closing connection"
                    );
                    break;
                },
                Err(e) => {
                    tracing::debug!(connection = %id, error = %e, "read failed, closing");
                    break;
                },
            }
        }

        reader_handle.deregister(id);
        let _ = reader_events
            .send(TransportEvent::Disconnected { connection: id })
            .await;
    });

    id
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> TransportLimits {
        TransportLimits {
            max_frame_bytes: 1024,
            max_in_flight: 2,
            idle_timeout_seconds: 300,
        }
    }

    #[tokio::test]
    async fn test_connection_delivers_frames_and_disconnect() {
        let handle = TransportHandle::new(CancellationToken::new());
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(client);

        let id = spawn_connection(
            &handle,
            &events_tx,
            limits(),
            "test".to_owned(),
            server_read,
            server_write,
            false,
        );

        match events_rx.recv().await.unwrap() {
            TransportEvent::Connected { connection, .. } => assert_eq!(connection, id),
            other => panic!("expected Connected, got {other:?}"),
        }

        write_length_prefixed(&mut client_write, br#"{"id":1}"#)
            .await
            .unwrap();
        match events_rx.recv().await.unwrap() {
            TransportEvent::Frame {
                connection,
                payload,
                permit,
            } => {
                assert_eq!(connection, id);
                assert_eq!(payload, br#"{"id":1}"#);
                drop(permit);
            },
            other => panic!("expected Frame, got {other:?}"),
        }

        // Server-side send reaches the client.
        handle.send(id, br#"{"ok":true}"#.to_vec()).await.unwrap();
        let mut reader = BufReader::new(&mut client_read);
        let echoed = read_length_prefixed(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(echoed, br#"{"ok":true}"#);

        drop(client_write);
        drop(client_read);
        loop {
            match events_rx.recv().await.unwrap() {
                TransportEvent::Disconnected { connection } => {
                    assert_eq!(connection, id);
                    break;
                },
                _ => {},
            }
        }
        assert_eq!(handle.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_connection() {
        let handle = TransportHandle::new(CancellationToken::new());
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (client, server) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        let id = spawn_connection(
            &handle,
            &events_tx,
            limits(),
            "test".to_owned(),
            server_read,
            server_write,
            false,
        );

        // Declare a frame bigger than the 1024-byte cap.
        let declared = 4096u32;
        tokio::io::AsyncWriteExt::write_all(&mut client_write, &declared.to_be_bytes())
            .await
            .unwrap();

        loop {
            match events_rx.recv().await.unwrap() {
                TransportEvent::Disconnected { connection } => {
                    assert_eq!(connection, id);
                    break;
                },
                TransportEvent::Connected { .. } => {},
                other => panic!("expected no frames, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_in_flight_backpressure_stalls_reads() {
        let handle = TransportHandle::new(CancellationToken::new());
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (client, server) = tokio::io::duplex(65536);
        let (server_read, server_write) = tokio::io::split(server);
        let (_client_read, mut client_write) = tokio::io::split(client);

        spawn_connection(
            &handle,
            &events_tx,
            limits(), // max_in_flight = 2
            "test".to_owned(),
            server_read,
            server_write,
            false,
        );

        for i in 0..3u8 {
            write_length_prefixed(&mut client_write, format!("{{\"id\":{i}}}").as_bytes())
                .await
                .unwrap();
        }

        let _connected = events_rx.recv().await.unwrap();
        let first = events_rx.recv().await.unwrap();
        let _second = events_rx.recv().await.unwrap();

        // Third frame must not arrive while both permits are held.
        let third = tokio::time::timeout(Duration::from_millis(100), events_rx.recv()).await;
        assert!(third.is_err(), "read loop must stall at max_in_flight");

        // Releasing one permit unblocks the third frame.
        if let TransportEvent::Frame { permit, .. } = first {
            drop(permit);
        }
        let third = tokio::time::timeout(Duration::from_secs(1), events_rx.recv())
            .await
            .expect("read loop must resume after permit release");
        assert!(matches!(third, Some(TransportEvent::Frame { .. })));
    }
}
