//! Correlation methods, their weights, and score combination.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::campaign::ConfidenceTier;

/// The correlation methods, in pipeline order. Order matters: weights
/// decrease down the pipeline, so earlier stages win ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationMethod {
    /// Grouping by source address, subnet, and ASN.
    IpCorrelation,
    /// Shared domains, TLS fingerprints, user agents.
    InfrastructureCorrelation,
    /// Attack sequences and payload signatures.
    BehavioralCorrelation,
    /// Time clustering in fixed-width buckets.
    TemporalCorrelation,
    /// Country and ASN grouping.
    GeospatialCorrelation,
    /// Subnet containment.
    NetworkCorrelation,
}

impl CorrelationMethod {
    /// Every method, in pipeline order.
    pub const ALL: &'static [Self] = &[
        Self::IpCorrelation,
        Self::InfrastructureCorrelation,
        Self::BehavioralCorrelation,
        Self::TemporalCorrelation,
        Self::GeospatialCorrelation,
        Self::NetworkCorrelation,
    ];

    /// Weight in the combined score. Weights sum to 1 and decrease down
    /// the pipeline so earlier stages dominate ties.
    #[must_use]
    pub const fn weight(self) -> f64 {
        match self {
            Self::IpCorrelation => 0.25,
            Self::InfrastructureCorrelation | Self::BehavioralCorrelation => 0.20,
            Self::TemporalCorrelation => 0.15,
            Self::GeospatialCorrelation | Self::NetworkCorrelation => 0.10,
        }
    }

    /// Stable name used in results and method selection arguments.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IpCorrelation => "ip_correlation",
            Self::InfrastructureCorrelation => "infrastructure_correlation",
            Self::BehavioralCorrelation => "behavioral_correlation",
            Self::TemporalCorrelation => "temporal_correlation",
            Self::GeospatialCorrelation => "geospatial_correlation",
            Self::NetworkCorrelation => "network_correlation",
        }
    }

    /// Parse a method selection argument.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == raw)
    }
}

impl std::fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One method's outcome.
#[derive(Debug, Clone, Serialize)]
pub struct MethodResult {
    /// Which method ran.
    pub method: CorrelationMethod,
    /// Whether the method found meaningful structure.
    pub fired: bool,
    /// Contribution in `[0, 1]` before weighting.
    pub contribution: f64,
    /// Indicators this method surfaced.
    pub indicators: Vec<String>,
    /// Method-specific detail for the response body.
    pub details: Value,
}

/// Combine method contributions into the campaign score.
///
/// Weighted sum over all selected methods; the result is clamped to
/// `[0, 1]`. Methods that did not fire contribute zero.
#[must_use]
pub fn combine(results: &[MethodResult]) -> f64 {
    let score: f64 = results
        .iter()
        .filter(|r| r.fired)
        .map(|r| r.contribution.clamp(0.0, 1.0) * r.method.weight())
        .sum();
    score.clamp(0.0, 1.0)
}

/// Map a score to its confidence tier.
#[must_use]
pub fn tier_of(score: f64) -> ConfidenceTier {
    if score < 0.25 {
        ConfidenceTier::Low
    } else if score < 0.5 {
        ConfidenceTier::Medium
    } else if score < 0.75 {
        ConfidenceTier::High
    } else {
        ConfidenceTier::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(method: CorrelationMethod, fired: bool, contribution: f64) -> MethodResult {
        MethodResult {
            method,
            fired,
            contribution,
            indicators: Vec::new(),
            details: json!({}),
        }
    }

    #[test]
    fn test_weights_sum_to_one() {
        let total: f64 = CorrelationMethod::ALL.iter().map(|m| m.weight()).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_unfired_methods_contribute_nothing() {
        let score = combine(&[
            result(CorrelationMethod::IpCorrelation, true, 1.0),
            result(CorrelationMethod::GeospatialCorrelation, false, 1.0),
        ]);
        assert!((score - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_all_methods_full_score() {
        let results: Vec<MethodResult> = CorrelationMethod::ALL
            .iter()
            .map(|m| result(*m, true, 1.0))
            .collect();
        assert!((combine(&results) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(tier_of(0.0), ConfidenceTier::Low);
        assert_eq!(tier_of(0.25), ConfidenceTier::Medium);
        assert_eq!(tier_of(0.5), ConfidenceTier::High);
        assert_eq!(tier_of(0.75), ConfidenceTier::Critical);
        assert_eq!(tier_of(1.0), ConfidenceTier::Critical);
    }

    #[test]
    fn test_method_name_roundtrip() {
        for method in CorrelationMethod::ALL {
            assert_eq!(CorrelationMethod::parse(method.as_str()), Some(*method));
        }
    }
}
