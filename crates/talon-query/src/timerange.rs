//! Time range parsing and normalization.
//!
//! Three input shapes, all normalized to UTC `[start, end)`:
//! - absolute: `start` / `end` RFC 3339 strings
//! - relative: `time_range_hours` counting back from now
//! - window around an event: `around_event: { event_id, window_minutes }`
//!   (the engine resolves the event's timestamp first)

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use talon_core::{ServerError, ServerResult};

/// A parsed, not yet resolved, time range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeRange {
    /// Explicit `[start, end)`.
    Absolute {
        /// Inclusive start.
        start: DateTime<Utc>,
        /// Exclusive end.
        end: DateTime<Utc>,
    },
    /// The last N hours, counted back from evaluation time.
    Relative {
        /// Window length in hours.
        hours: u32,
    },
    /// A window centered on one event.
    AroundEvent {
        /// The anchor event id.
        event_id: String,
        /// Half-width of the window in minutes.
        window_minutes: u32,
    },
}

/// A normalized UTC `[start, end)` window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Parse from tool arguments. Defaults to the last 24 hours when no
    /// range keys are present.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unparseable timestamps, inverted
    /// ranges, or conflicting range shapes.
    pub fn from_args(args: &Value) -> ServerResult<Self> {
        let has_absolute = args.get("start").is_some() || args.get("end").is_some();
        let has_relative = args.get("time_range_hours").is_some();
        let has_event = args.get("around_event").is_some();
        let shapes = usize::from(has_absolute) + usize::from(has_relative) + usize::from(has_event);
        if shapes > 1 {
            return Err(ServerError::validation(
                "time_range",
                "use exactly one of start/end, time_range_hours, or around_event",
            ));
        }

        if has_event {
            let spec = &args["around_event"];
            let event_id = spec
                .get("event_id")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ServerError::validation("around_event.event_id", "required string")
                })?;
            let window_minutes = spec
                .get("window_minutes")
                .and_then(Value::as_u64)
                .unwrap_or(60);
            let window_minutes = u32::try_from(window_minutes).map_err(|_| {
                ServerError::validation("around_event.window_minutes", "value too large")
            })?;
            return Ok(Self::AroundEvent {
                event_id: event_id.to_owned(),
                window_minutes,
            });
        }

        if has_absolute {
            let start = parse_rfc3339(args, "start")?;
            let end = parse_rfc3339(args, "end")?;
            if start >= end {
                return Err(ServerError::validation("end", "end must be after start"));
            }
            return Ok(Self::Absolute { start, end });
        }

        let hours = args
            .get("time_range_hours")
            .and_then(Value::as_u64)
            .unwrap_or(24);
        let hours = u32::try_from(hours)
            .map_err(|_| ServerError::validation("time_range_hours", "value too large"))?;
        if hours == 0 {
            return Err(ServerError::validation(
                "time_range_hours",
                "must be at least 1",
            ));
        }
        Ok(Self::Relative { hours })
    }

    /// Resolve into a concrete window. `AroundEvent` needs the anchor
    /// event's timestamp, which the engine looks up first.
    #[must_use]
    pub fn resolve(&self, now: DateTime<Utc>, event_time: Option<DateTime<Utc>>) -> ResolvedRange {
        match self {
            Self::Absolute { start, end } => ResolvedRange {
                start: *start,
                end: *end,
            },
            Self::Relative { hours } => ResolvedRange {
                start: now - Duration::hours(i64::from(*hours)),
                end: now,
            },
            Self::AroundEvent { window_minutes, .. } => {
                let anchor = event_time.unwrap_or(now);
                let half = Duration::minutes(i64::from(*window_minutes));
                ResolvedRange {
                    start: anchor - half,
                    end: anchor + half,
                }
            },
        }
    }
}

fn parse_rfc3339(args: &Value, key: &str) -> ServerResult<DateTime<Utc>> {
    let raw = args
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ServerError::validation(key, "required RFC 3339 timestamp"))?;
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ServerError::validation(key, format!("not RFC 3339: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_is_last_24_hours() {
        let range = TimeRange::from_args(&json!({})).unwrap();
        assert_eq!(range, TimeRange::Relative { hours: 24 });
    }

    #[test]
    fn test_absolute_range() {
        let range = TimeRange::from_args(&json!({
            "start": "2026-07-01T00:00:00Z",
            "end": "2026-07-02T00:00:00Z",
        }))
        .unwrap();
        let resolved = range.resolve(Utc::now(), None);
        assert_eq!(
            (resolved.end - resolved.start).num_hours(),
            24
        );
    }

    #[test]
    fn test_inverted_absolute_rejected() {
        let result = TimeRange::from_args(&json!({
            "start": "2026-07-02T00:00:00Z",
            "end": "2026-07-01T00:00:00Z",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_conflicting_shapes_rejected() {
        let result = TimeRange::from_args(&json!({
            "time_range_hours": 24,
            "start": "2026-07-01T00:00:00Z",
            "end": "2026-07-02T00:00:00Z",
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_hours_rejected() {
        assert!(TimeRange::from_args(&json!({ "time_range_hours": 0 })).is_err());
    }

    #[test]
    fn test_around_event_window() {
        let range = TimeRange::from_args(&json!({
            "around_event": { "event_id": "a1", "window_minutes": 30 }
        }))
        .unwrap();
        let anchor = "2026-07-01T12:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let resolved = range.resolve(Utc::now(), Some(anchor));
        assert_eq!((resolved.end - resolved.start).num_minutes(), 60);
        assert!(resolved.start < anchor && anchor < resolved.end);
    }
}
