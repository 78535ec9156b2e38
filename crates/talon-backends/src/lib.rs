//! Talon Backends - narrow typed clients for external services.
//!
//! This crate provides:
//! - The [`BackendError`] taxonomy with failure classification for the
//!   circuit breakers and the retry policy
//! - Trait seams ([`EventStore`], [`ReputationService`], [`ReportRenderer`])
//!   so handlers and tests depend on the contract, not on reqwest
//! - The Elasticsearch HTTP client with the user-facing field map
//! - The threat-intel HTTP client with its own vendor rate bucket and a
//!   TTL response cache
//! - The report renderer spawning the typesetter subprocess in an isolated
//!   working directory
//!
//! Every adapter is cancel-aware: in-flight I/O races the request's
//! cancellation token and aborts promptly.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

mod elastic;
mod error;
pub mod fieldmap;
mod health;
mod intel;
mod report;
mod traits;

pub use elastic::ElasticClient;
pub use error::{BackendError, BackendResult};
pub use health::HealthStatus;
pub use intel::ThreatIntelClient;
pub use report::TypesetRenderer;
pub use traits::{
    EventDoc, EventStore, ReportRenderer, Reputation, ReputationService, SearchRequest,
    SearchResponse, SortKey,
};
