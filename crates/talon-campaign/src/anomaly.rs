//! Statistical anomaly detection over bucketed event series.
//!
//! One explicit mode per call — the detector never mixes methods:
//!
//! - `zscore`: flag buckets more than `threshold` standard deviations
//!   from the mean (default 3.0)
//! - `iqr`: flag buckets outside `[Q1 - 1.5·IQR, Q3 + 1.5·IQR]`
//! - `percentile`: flag buckets above the `threshold` percentile
//!   (default 95)

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::event::CampaignEvent;

/// Detection mode, selected explicitly by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyMode {
    /// Standard-deviation distance from the mean.
    Zscore,
    /// Tukey fences on the interquartile range.
    Iqr,
    /// Everything above a percentile.
    Percentile,
}

impl AnomalyMode {
    /// Parse the tool argument.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "zscore" => Some(Self::Zscore),
            "iqr" => Some(Self::Iqr),
            "percentile" => Some(Self::Percentile),
            _ => None,
        }
    }
}

/// One flagged bucket.
#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    /// Bucket start time.
    pub bucket_start: DateTime<Utc>,
    /// Event count in the bucket.
    pub count: usize,
    /// Mode-specific deviation measure (z-score, fence distance, or
    /// percentile rank).
    pub deviation: f64,
}

/// Bucket events and run the selected detector.
///
/// Returns the anomalies plus series statistics for the response body.
#[must_use]
pub fn detect_anomalies(
    events: &[CampaignEvent],
    bucket_minutes: i64,
    mode: AnomalyMode,
    threshold: Option<f64>,
) -> (Vec<Anomaly>, Value) {
    let bucket = Duration::minutes(bucket_minutes.max(1));
    let bucket_seconds = bucket.num_seconds();

    let mut counts: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
    for event in events {
        let slot = event.timestamp.timestamp().div_euclid(bucket_seconds);
        *counts.entry(slot).or_insert(0) += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let series: Vec<f64> = counts.values().map(|c| *c as f64).collect();

    let stats = series_stats(&series);
    let anomalies: Vec<Anomaly> = match mode {
        AnomalyMode::Zscore => {
            let limit = threshold.unwrap_or(3.0);
            let std_dev = stats.std_dev.max(f64::EPSILON);
            counts
                .iter()
                .filter_map(|(slot, count)| {
                    #[allow(clippy::cast_precision_loss)]
                    let z = (*count as f64 - stats.mean) / std_dev;
                    (z.abs() > limit).then(|| anomaly(*slot, bucket_seconds, *count, z))
                })
                .collect()
        },
        AnomalyMode::Iqr => {
            let fence = 1.5 * (stats.q3 - stats.q1);
            let low = stats.q1 - fence;
            let high = stats.q3 + fence;
            counts
                .iter()
                .filter_map(|(slot, count)| {
                    #[allow(clippy::cast_precision_loss)]
                    let value = *count as f64;
                    (value < low || value > high).then(|| {
                        let distance = if value > high { value - high } else { low - value };
                        anomaly(*slot, bucket_seconds, *count, distance)
                    })
                })
                .collect()
        },
        AnomalyMode::Percentile => {
            let percentile = threshold.unwrap_or(95.0).clamp(0.0, 100.0);
            let cutoff = percentile_of(&series, percentile);
            counts
                .iter()
                .filter_map(|(slot, count)| {
                    #[allow(clippy::cast_precision_loss)]
                    let value = *count as f64;
                    (value > cutoff).then(|| anomaly(*slot, bucket_seconds, *count, percentile))
                })
                .collect()
        },
    };

    let summary = json!({
        "buckets": series.len(),
        "mean": stats.mean,
        "std_dev": stats.std_dev,
        "q1": stats.q1,
        "q3": stats.q3,
        "max": stats.max,
    });
    (anomalies, summary)
}

fn anomaly(slot: i64, bucket_seconds: i64, count: usize, deviation: f64) -> Anomaly {
    Anomaly {
        bucket_start: DateTime::from_timestamp(slot * bucket_seconds, 0).unwrap_or_default(),
        count,
        deviation,
    }
}

struct SeriesStats {
    mean: f64,
    std_dev: f64,
    q1: f64,
    q3: f64,
    max: f64,
}

fn series_stats(series: &[f64]) -> SeriesStats {
    if series.is_empty() {
        return SeriesStats {
            mean: 0.0,
            std_dev: 0.0,
            q1: 0.0,
            q3: 0.0,
            max: 0.0,
        };
    }
    #[allow(clippy::cast_precision_loss)]
    let n = series.len() as f64;
    let mean = series.iter().sum::<f64>() / n;
    let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    SeriesStats {
        mean,
        std_dev: variance.sqrt(),
        q1: percentile_of(&sorted, 25.0),
        q3: percentile_of(&sorted, 75.0),
        max: sorted.last().copied().unwrap_or(0.0),
    }
}

/// Nearest-rank percentile over an unsorted or sorted series.
fn percentile_of(series: &[f64], percentile: f64) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    #[allow(clippy::cast_precision_loss)]
    let rank = (percentile / 100.0 * (sorted.len() as f64 - 1.0)).round();
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = (rank.max(0.0) as usize).min(sorted.len() - 1);
    sorted[index]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn series_events(counts_per_hour: &[usize]) -> Vec<CampaignEvent> {
        let base = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let mut events = Vec::new();
        for (hour, count) in counts_per_hour.iter().enumerate() {
            for i in 0..*count {
                events.push(CampaignEvent {
                    id: format!("ev{hour}-{i}"),
                    timestamp: base + Duration::hours(hour as i64) + Duration::seconds(i as i64),
                    source_ip: None,
                    destination_ip: None,
                    destination_port: None,
                    country: None,
                    asn: None,
                    domain: None,
                    user_agent: None,
                    ja3: None,
                    username: None,
                    session_id: None,
                    command: None,
                    file_hash: None,
                    url: None,
                    event_type: None,
                });
            }
        }
        events
    }

    #[test]
    fn test_zscore_flags_spike() {
        let mut counts = vec![10usize; 24];
        counts[12] = 200;
        let events = series_events(&counts);
        let (anomalies, _) = detect_anomalies(&events, 60, AnomalyMode::Zscore, None);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].count, 200);
    }

    #[test]
    fn test_flat_series_has_no_anomalies() {
        let events = series_events(&[10; 24]);
        for mode in [AnomalyMode::Zscore, AnomalyMode::Iqr] {
            let (anomalies, _) = detect_anomalies(&events, 60, mode, None);
            assert!(anomalies.is_empty(), "{mode:?} flagged a flat series");
        }
    }

    #[test]
    fn test_iqr_flags_outlier() {
        // Values 6..10 give a non-degenerate IQR; one spike sits far
        // outside the Tukey fence.
        let mut counts: Vec<usize> = (0..20).map(|i| 6 + i % 5).collect();
        counts[7] = 120;
        let events = series_events(&counts);
        let (anomalies, _) = detect_anomalies(&events, 60, AnomalyMode::Iqr, None);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].count, 120);
    }

    #[test]
    fn test_percentile_cutoff() {
        let counts: Vec<usize> = (1..=20).collect();
        let events = series_events(&counts);
        let (anomalies, _) = detect_anomalies(&events, 60, AnomalyMode::Percentile, Some(90.0));
        assert!(!anomalies.is_empty());
        assert!(anomalies.len() <= 3);
        assert!(anomalies.iter().all(|a| a.count >= 18));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(AnomalyMode::parse("zscore"), Some(AnomalyMode::Zscore));
        assert_eq!(AnomalyMode::parse("iqr"), Some(AnomalyMode::Iqr));
        assert_eq!(AnomalyMode::parse("both"), None);
    }
}
