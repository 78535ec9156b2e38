//! Talon Campaign - correlation of attack campaigns from seed indicators.
//!
//! This crate provides:
//! - The staged correlation pipeline (seed expansion, IP, infrastructure,
//!   behavioral, temporal, geospatial, network) with per-method scoring
//! - Content-hashed, reproducible campaign identifiers
//! - Indicator expansion, campaign comparison, and ongoing-campaign
//!   detection
//! - Statistical anomaly detection over bucketed event series
//!
//! The correlator fetches events through the query engine, so every
//! backend call inherits the circuit breaker and retry policy.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod anomaly;
mod campaign;
mod event;
mod indicator;
mod pipeline;
mod score;
mod stages;
mod tools;

pub use anomaly::{Anomaly, AnomalyMode, detect_anomalies};
pub use campaign::{Campaign, CampaignId, ConfidenceTier};
pub use event::CampaignEvent;
pub use indicator::Indicator;
pub use pipeline::{AnalysisOutcome, Correlator, ExpandStrategy};
pub use score::{CorrelationMethod, MethodResult};
pub use tools::{
    AnalyzeCampaignTool, CampaignTimelineTool, DetectAnomaliesTool, DetectOngoingTool,
    ExpandIndicatorsTool,
};
