//! Trait seams between handlers and the concrete adapters.
//!
//! The query engine and the campaign correlator depend on these traits;
//! production wires in the reqwest-backed clients, tests wire in fixtures.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use talon_core::RequestCtx;

use crate::error::BackendResult;
use crate::health::HealthStatus;

/// The two-component sort position of a document, used by `search_after`
/// pagination: `(@timestamp as epoch millis, _id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    /// Epoch milliseconds of `@timestamp`.
    pub timestamp_ms: i64,
    /// Document `_id` tiebreak.
    pub id: String,
}

/// One document returned by a search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
    /// Document `_id`.
    pub id: String,
    /// The `_source` body.
    pub source: Value,
    /// Sort position (present when the request sorted).
    pub sort: Option<SortKey>,
}

/// A search request in storage terms (fields already translated).
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    /// Elasticsearch query DSL.
    pub query: Value,
    /// Offset pagination start.
    pub from: Option<usize>,
    /// Page size.
    pub size: usize,
    /// Cursor pagination position; mutually exclusive with `from`.
    pub search_after: Option<SortKey>,
    /// Storage-name subset to fetch (`None` = full documents).
    pub fields: Option<Vec<String>>,
}

/// A search response with the metrics the performance block reports.
#[derive(Debug, Clone, Default)]
pub struct SearchResponse {
    /// Returned documents, in `(@timestamp desc, _id desc)` order.
    pub hits: Vec<EventDoc>,
    /// Total matching documents.
    pub total: u64,
    /// Backend-reported query time.
    pub took_ms: u64,
    /// Shards consulted.
    pub shards: u32,
    /// Indices consulted.
    pub indices: Vec<String>,
}

/// The Elasticsearch-shaped event store.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Count documents matching a query.
    async fn count(&self, ctx: &RequestCtx, query: &Value) -> BackendResult<u64>;

    /// Execute a search.
    async fn search(&self, ctx: &RequestCtx, request: SearchRequest) -> BackendResult<SearchResponse>;

    /// Execute an aggregation-only query; returns the `aggregations` body.
    async fn aggregate(&self, ctx: &RequestCtx, query: &Value, aggs: &Value) -> BackendResult<Value>;

    /// Probe backend health.
    async fn health(&self) -> HealthStatus;
}

/// Reputation verdict for one indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reputation {
    /// The looked-up indicator.
    pub indicator: String,
    /// Vendor score in `[0, 100]`, higher is worse.
    pub score: u8,
    /// Vendor categories (`"scanner"`, `"botnet"`, ...).
    pub categories: Vec<String>,
    /// Last vendor-side sighting, RFC 3339.
    pub last_seen: Option<String>,
}

/// The threat-intelligence vendor.
#[async_trait]
pub trait ReputationService: Send + Sync {
    /// Look up one IP.
    async fn reputation(&self, ctx: &RequestCtx, ip: &str) -> BackendResult<Reputation>;

    /// Look up a batch; order matches the input, failures drop out.
    async fn batch_reputation(
        &self,
        ctx: &RequestCtx,
        ips: &[String],
    ) -> BackendResult<Vec<Reputation>>;

    /// Probe vendor reachability.
    async fn health(&self) -> HealthStatus;
}

/// The out-of-process report renderer.
#[async_trait]
pub trait ReportRenderer: Send + Sync {
    /// Render a template with data; returns the output bytes (PDF).
    async fn render(&self, ctx: &RequestCtx, template: &str, data: &Value) -> BackendResult<Vec<u8>>;

    /// Probe that the typesetter binary exists and the output directory is
    /// writable.
    async fn health(&self) -> HealthStatus;
}
