//! The `performance_metrics` block attached to every query response.

use serde::{Deserialize, Serialize};

/// Rough complexity class of the executed query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    /// Time range only.
    Simple,
    /// Time range plus a few filters.
    Moderate,
    /// Many filters or a projection.
    Complex,
    /// Aggregation query.
    Aggregation,
}

/// Metrics reported with every search, stream, and aggregation response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Backend-reported query time in milliseconds.
    pub query_time_ms: u64,
    /// Indices consulted.
    pub indices_scanned: usize,
    /// Total documents the query matched.
    pub total_documents_examined: u64,
    /// Shards consulted.
    pub shards_scanned: u32,
    /// Complexity class.
    pub query_complexity: QueryComplexity,
    /// Optimizations the smart optimizer applied, in order.
    pub optimizations_applied: Vec<String>,
    /// Aggregations used, when any.
    pub aggregations_used: Vec<String>,
}

impl PerformanceMetrics {
    /// Classify complexity from the request shape.
    #[must_use]
    pub fn classify(filter_count: usize, has_projection: bool, is_aggregation: bool) -> QueryComplexity {
        if is_aggregation {
            QueryComplexity::Aggregation
        } else if filter_count > 3 || has_projection {
            QueryComplexity::Complex
        } else if filter_count > 0 {
            QueryComplexity::Moderate
        } else {
            QueryComplexity::Simple
        }
    }
}
