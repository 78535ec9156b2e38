//! The campaign record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::score::CorrelationMethod;

/// Confidence tier derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    /// Score below 0.25.
    Low,
    /// Score in `[0.25, 0.5)`.
    Medium,
    /// Score in `[0.5, 0.75)`.
    High,
    /// Score of 0.75 and above.
    Critical,
}

/// Content-hashed campaign identifier.
///
/// Derived from the sorted seed set and the analysis window, so the same
/// inputs over the same data always name the same campaign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    /// Derive the id from seeds and window.
    #[must_use]
    pub fn derive(seeds: &[String], start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut sorted = seeds.to_vec();
        sorted.sort();
        sorted.dedup();
        let mut hasher = blake3::Hasher::new_derive_key("talon campaign id v1");
        for seed in &sorted {
            hasher.update(seed.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.update(start.timestamp_millis().to_be_bytes().as_slice());
        hasher.update(end.timestamp_millis().to_be_bytes().as_slice());
        let hash = hasher.finalize();
        Self(hash.to_hex().as_str()[..24].to_owned())
    }
}

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "campaign:{}", self.0)
    }
}

/// An immutable correlation result.
#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    /// Content-hashed id.
    pub id: CampaignId,
    /// The seeds the analysis started from.
    pub seed_indicators: Vec<String>,
    /// Numeric score in `[0, 1]`.
    pub score: f64,
    /// Tier derived from the score.
    pub confidence: ConfidenceTier,
    /// Earliest correlated event.
    pub start: DateTime<Utc>,
    /// Latest correlated event.
    pub end: DateTime<Utc>,
    /// Indicators surfaced by the stages (beyond the seeds).
    pub related_indicators: Vec<String>,
    /// Correlated event ids.
    pub event_ids: Vec<String>,
    /// Methods that found structure.
    pub correlation_methods_fired: Vec<CorrelationMethod>,
}
