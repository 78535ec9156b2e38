//! Talon Transport - connection lifecycle and JSON-RPC framing.
//!
//! This crate provides:
//! - Line-delimited framing over the process's standard streams (stdio mode)
//! - 4-byte big-endian length-prefixed framing over TCP
//! - The connection registry with outbound queues and idle expiry
//! - Per-connection in-flight backpressure via semaphore permits
//!
//! Both transports deliver [`TransportEvent`]s over an mpsc channel to the
//! server facade and accept outbound frames through [`TransportHandle`].
//! Exactly one frame is written to a connection at a time; a frame event
//! carries the in-flight permit that is released when the request finishes,
//! which stalls the read loop once the per-connection cap is reached.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod conn;
mod error;
pub mod frame;
mod stdio;
mod tcp;

pub use conn::{TransportEvent, TransportHandle, TransportLimits};
pub use error::{TransportError, TransportResult};
pub use stdio::StdioTransport;
pub use tcp::TcpTransport;
