//! Stdio transport: one connection over the process's standard streams.
//!
//! Frames are newline-delimited JSON. Logs go to stderr (the telemetry
//! crate enforces that), so stdout carries nothing but response frames.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use talon_core::ConnectionId;

use crate::conn::{ConnEntry, TransportEvent, TransportHandle, TransportLimits};
use crate::error::TransportError;
use crate::frame::{read_line_frame, write_line_frame};

/// Capacity of the event channel to the server facade.
const EVENT_QUEUE: usize = 256;

/// Capacity of the outbound frame queue.
const OUTBOUND_QUEUE: usize = 32;

/// Stdio transport.
pub struct StdioTransport {
    limits: TransportLimits,
    handle: TransportHandle,
    events_tx: mpsc::Sender<TransportEvent>,
}

impl StdioTransport {
    /// Create the transport and the event receiver the server reads from.
    #[must_use]
    pub fn new(limits: TransportLimits) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        let transport = Self {
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

    /// Spawn the read/write tasks over the process's standard streams.
    #[must_use]
    pub fn start(&self) -> ConnectionId {
        self.start_with(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Spawn over explicit streams (tests use in-memory pipes).
    pub fn start_with<R, W>(&self, input: R, output: W) -> ConnectionId
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.handle.allocate_id();
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(Semaphore::new(self.limits.max_in_flight));
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_QUEUE);

        self.handle.register(
            id,
            ConnEntry {
                outbound: outbound_tx,
                cancel: cancel.clone(),
                in_flight: Arc::clone(&in_flight),
            },
        );

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut writer = BufWriter::new(output);
            loop {
                let frame = tokio::select! {
                    () = writer_cancel.cancelled() => break,
                    frame = outbound_rx.recv() => frame,
                };
                let Some(frame) = frame else { break };
                if let Err(e) = write_line_frame(&mut writer, &frame).await {
                    tracing::debug!(error = %e, "stdout write failed");
                    break;
                }
            }
        });

        let events = self.events_tx.clone();
        let handle = self.handle.clone();
        let max_frame_bytes = self.limits.max_frame_bytes;
        tokio::spawn(async move {
            let mut reader = BufReader::new(input);
            let _ = events
                .send(TransportEvent::Connected {
                    connection: id,
                    peer: "stdio".to_owned(),
                })
                .await;

            loop {
                let permit = tokio::select! {
                    () = cancel.cancelled() => break,
                    permit = Arc::clone(&in_flight).acquire_owned() => match permit {
                        Ok(p) => p,
                        Err(_) => break,
                    },
                };

                let frame = tokio::select! {
                    () = cancel.cancelled() => break,
                    frame = read_line_frame(&mut reader, max_frame_bytes) => frame,
                };

                match frame {
                    Ok(Some(payload)) => {
                        if events
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
                        tracing::warn!(size, max, "MESSAGE_SIZE_EXCEEDED on stdio, closing");
                        break;
                    },
                    Err(e) => {
                        tracing::debug!(error = %e, "stdin read failed, closing");
                        break;
                    },
                }
            }

            handle.deregister(id);
            let _ = events
                .send(TransportEvent::Disconnected { connection: id })
                .await;
        });

        id
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_stdio_frames_roundtrip() {
        let (transport, mut events) = StdioTransport::new(TransportLimits::default());
        let (mut client_in, server_in) = tokio::io::duplex(4096);
        let (client_out, server_out) = tokio::io::duplex(4096);
        let id = transport.start_with(server_in, server_out);

        client_in.write_all(b"{\"id\":1}\n").await.unwrap();

        match events.recv().await.unwrap() {
            TransportEvent::Connected { peer, .. } => assert_eq!(peer, "stdio"),
            other => panic!("expected Connected, got {other:?}"),
        }
        match events.recv().await.unwrap() {
            TransportEvent::Frame { payload, .. } => assert_eq!(payload, b"{\"id\":1}"),
            other => panic!("expected Frame, got {other:?}"),
        }

        transport.handle().send(id, b"{\"ok\":1}".to_vec()).await.unwrap();
        let mut reader = tokio::io::BufReader::new(client_out);
        let line = read_line_frame(&mut reader, 4096).await.unwrap().unwrap();
        assert_eq!(line, b"{\"ok\":1}");
    }

    #[tokio::test]
    async fn test_stdin_eof_disconnects() {
        let (transport, mut events) = StdioTransport::new(TransportLimits::default());
        let (client_in, server_in) = tokio::io::duplex(4096);
        let (_client_out, server_out) = tokio::io::duplex(4096);
        let id = transport.start_with(server_in, server_out);
        drop(client_in);

        loop {
            match events.recv().await.unwrap() {
                TransportEvent::Disconnected { connection } => {
                    assert_eq!(connection, id);
                    break;
                },
                TransportEvent::Connected { .. } => {},
                other => panic!("unexpected event {other:?}"),
            }
        }
    }
}
