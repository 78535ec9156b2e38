//! Talon Query - the query engine.
//!
//! This crate provides:
//! - User-facing field translation with typed unknown-field errors
//! - Time range normalization (absolute, relative, window-around-event)
//! - Offset and cursor (`search_after`) pagination
//! - The smart optimizer that keeps responses inside the size budget
//! - Streaming with resumable cursors and session-context chunking
//!
//! Every search response carries a `performance_metrics` block; every
//! backend call goes through the Elasticsearch circuit breaker and the
//! bounded retry policy for transient failures.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod builder;
pub mod cursor;
mod engine;
mod metrics;
mod optimize;
mod params;
mod stream;
mod timerange;

pub use engine::{QueryEngine, QueryEventsTool, StreamEventsTool};
pub use metrics::{PerformanceMetrics, QueryComplexity};
pub use params::{FieldFilter, QueryParams};
pub use stream::{SessionChunk, StreamOutcome};
pub use timerange::{ResolvedRange, TimeRange};
