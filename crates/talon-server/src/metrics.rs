//! The read-only metrics snapshot.
//!
//! External observers (an operator UI, a scraper) consume value copies;
//! nothing here exposes mutable server state.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

use talon_breaker::BreakerStatus;

/// Per-tool latency accounting.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ToolStats {
    /// Completed calls.
    pub calls: u64,
    /// Failed calls.
    pub failures: u64,
    /// Mean latency in milliseconds.
    pub avg_latency_ms: u64,
}

/// Mutable counters the server updates per request.
pub struct MetricsState {
    started: Instant,
    requests_total: AtomicU64,
    requests_failed: AtomicU64,
    per_tool: Mutex<BTreeMap<String, (u64, u64, u64)>>,
}

impl MetricsState {
    /// Create fresh counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            per_tool: Mutex::new(BTreeMap::new()),
        }
    }

    /// Seconds since server start.
    #[must_use]
    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Record one completed request.
    pub fn record_request(&self, tool: Option<&str>, elapsed_ms: u64, failed: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(tool) = tool {
            if let Ok(mut per_tool) = self.per_tool.lock() {
                let entry = per_tool.entry(tool.to_owned()).or_insert((0, 0, 0));
                entry.0 = entry.0.saturating_add(1);
                if failed {
                    entry.1 = entry.1.saturating_add(1);
                }
                entry.2 = entry.2.saturating_add(elapsed_ms);
            }
        }
    }

    fn tool_stats(&self) -> BTreeMap<String, ToolStats> {
        self.per_tool.lock().map_or_else(
            |_| BTreeMap::new(),
            |per_tool| {
                per_tool
                    .iter()
                    .map(|(tool, (calls, failures, total_ms))| {
                        (
                            tool.clone(),
                            ToolStats {
                                calls: *calls,
                                failures: *failures,
                                avg_latency_ms: total_ms.checked_div(*calls).unwrap_or(0),
                            },
                        )
                    })
                    .collect()
            },
        )
    }
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsState")
            .field("requests_total", &self.requests_total.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// The value copy handed to observers.
#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    /// Seconds since server start.
    pub uptime_seconds: u64,
    /// Requests accepted since start.
    pub requests_total: u64,
    /// Requests that produced an error response.
    pub requests_failed: u64,
    /// Per-tool latency stats.
    pub tools: BTreeMap<String, ToolStats>,
    /// Breaker states at snapshot time.
    pub breakers: Vec<BreakerStatus>,
    /// Feature availability at snapshot time.
    pub features: BTreeMap<String, bool>,
}

impl Metrics {
    /// Build a snapshot.
    #[must_use]
    pub fn snapshot(
        state: &MetricsState,
        breakers: Vec<BreakerStatus>,
        features: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            uptime_seconds: state.uptime_seconds(),
            requests_total: state.requests_total.load(Ordering::Relaxed),
            requests_failed: state.requests_failed.load(Ordering::Relaxed),
            tools: state.tool_stats(),
            breakers,
            features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_tool_averaging() {
        let state = MetricsState::new();
        state.record_request(Some("analyze_campaign"), 100, false);
        state.record_request(Some("analyze_campaign"), 300, true);
        state.record_request(None, 5, false);

        let metrics = Metrics::snapshot(&state, Vec::new(), BTreeMap::new());
        assert_eq!(metrics.requests_total, 3);
        assert_eq!(metrics.requests_failed, 1);
        let stats = &metrics.tools["analyze_campaign"];
        assert_eq!(stats.calls, 2);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.avg_latency_ms, 200);
    }
}
