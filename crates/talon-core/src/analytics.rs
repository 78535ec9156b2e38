//! Error aggregation for the analytics tool.
//!
//! Every error the server produces is recorded here. Records live in a
//! bounded ring buffer and reports only consider the configured sliding
//! window, so memory stays flat regardless of error volume.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::types::CorrelationId;

/// A single recorded error event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The stable error code.
    pub code: ErrorCode,
    /// When the error was produced.
    pub at: DateTime<Utc>,
    /// The tool being invoked, if the error happened inside a tool call.
    pub tool: Option<String>,
    /// Correlation id of the failing request.
    pub correlation_id: CorrelationId,
}

/// Direction the error rate is moving within the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorTrend {
    /// More errors in the recent half of the window than the older half.
    Increasing,
    /// Fewer errors in the recent half.
    Decreasing,
    /// Roughly flat (or too few samples to tell).
    Stable,
}

/// Aggregated view over the current window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Total errors inside the window.
    pub total: usize,
    /// Error counts keyed by stable code name.
    pub by_code: HashMap<String, usize>,
    /// Error counts keyed by tool name (`"-"` for non-tool errors).
    pub by_tool: HashMap<String, usize>,
    /// Rate direction.
    pub trend: ErrorTrend,
    /// Tools ranked by error count, worst first, capped at five.
    pub top_offenders: Vec<(String, usize)>,
    /// Window length the report covers, in seconds.
    pub window_seconds: u64,
}

/// Bounded ring buffer of error records with sliding-window reports.
///
/// Thread-safe; writers take a short mutex. Defaults: 1000 records,
/// 300 second window.
pub struct ErrorAnalytics {
    capacity: usize,
    window: Duration,
    records: Mutex<VecDeque<ErrorRecord>>,
}

impl ErrorAnalytics {
    /// Create an aggregator with explicit bounds.
    #[must_use]
    pub fn new(capacity: usize, window_seconds: u64) -> Self {
        Self {
            capacity,
            window: Duration::seconds(i64::try_from(window_seconds).unwrap_or(300)),
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    /// Record one error event.
    pub fn record(&self, code: ErrorCode, tool: Option<&str>, correlation_id: CorrelationId) {
        let record = ErrorRecord {
            code,
            at: Utc::now(),
            tool: tool.map(str::to_owned),
            correlation_id,
        };
        if let Ok(mut records) = self.records.lock() {
            if records.len() == self.capacity {
                records.pop_front();
            }
            records.push_back(record);
        }
    }

    /// Number of records currently held (including ones outside the window).
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().map_or(0, |r| r.len())
    }

    /// Whether no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the aggregated report over the sliding window.
    #[must_use]
    pub fn report(&self) -> ErrorReport {
        self.report_at(Utc::now())
    }

    fn report_at(&self, now: DateTime<Utc>) -> ErrorReport {
        let cutoff = now - self.window;
        let midpoint = now - self.window / 2;

        let mut by_code: HashMap<String, usize> = HashMap::new();
        let mut by_tool: HashMap<String, usize> = HashMap::new();
        let mut older = 0usize;
        let mut recent = 0usize;
        let mut total = 0usize;

        if let Ok(records) = self.records.lock() {
            for record in records.iter().filter(|r| r.at >= cutoff) {
                total += 1;
                *by_code.entry(record.code.as_str().to_owned()).or_insert(0) += 1;
                let tool = record.tool.as_deref().unwrap_or("-").to_owned();
                *by_tool.entry(tool).or_insert(0) += 1;
                if record.at >= midpoint {
                    recent += 1;
                } else {
                    older += 1;
                }
            }
        }

        let trend = if total < 4 {
            ErrorTrend::Stable
        } else if recent > older.saturating_mul(2) {
            ErrorTrend::Increasing
        } else if older > recent.saturating_mul(2) {
            ErrorTrend::Decreasing
        } else {
            ErrorTrend::Stable
        };

        let mut top_offenders: Vec<(String, usize)> = by_tool
            .iter()
            .filter(|(tool, _)| tool.as_str() != "-")
            .map(|(tool, count)| (tool.clone(), *count))
            .collect();
        top_offenders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_offenders.truncate(5);

        ErrorReport {
            total,
            by_code,
            by_tool,
            trend,
            top_offenders,
            window_seconds: self.window.num_seconds().unsigned_abs(),
        }
    }
}

impl std::fmt::Debug for ErrorAnalytics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorAnalytics")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}
