//! Health probe result.

use serde::{Deserialize, Serialize};

/// Outcome of one backend health probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the backend is usable.
    pub ok: bool,
    /// Human-readable detail (`"green"`, `"connect refused"`, ...).
    pub detail: String,
}

impl HealthStatus {
    /// A healthy status.
    #[must_use]
    pub fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    /// An unhealthy status.
    #[must_use]
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}
