//! Normalized event view for correlation.

use chrono::{DateTime, Utc};
use serde_json::Value;

use talon_backends::EventDoc;
use talon_backends::fieldmap::FieldMap;

/// The fields correlation stages care about, extracted once per event
/// through the field map (fallback chains included).
#[derive(Debug, Clone)]
pub struct CampaignEvent {
    /// Document id.
    pub id: String,
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Attacking address.
    pub source_ip: Option<String>,
    /// Target address.
    pub destination_ip: Option<String>,
    /// Target port.
    pub destination_port: Option<u16>,
    /// Source country ISO code.
    pub country: Option<String>,
    /// Source autonomous system number.
    pub asn: Option<u32>,
    /// Contacted domain.
    pub domain: Option<String>,
    /// HTTP user agent.
    pub user_agent: Option<String>,
    /// TLS client fingerprint.
    pub ja3: Option<String>,
    /// Login name attempted.
    pub username: Option<String>,
    /// Honeypot session id.
    pub session_id: Option<String>,
    /// Shell input, when captured.
    pub command: Option<String>,
    /// Dropped-file hash.
    pub file_hash: Option<String>,
    /// Fetched URL.
    pub url: Option<String>,
    /// Event type.
    pub event_type: Option<String>,
}

impl CampaignEvent {
    /// Extract from a raw document. Returns `None` when the document has
    /// no usable timestamp (such events cannot be correlated).
    #[must_use]
    pub fn from_doc(map: &FieldMap, doc: &EventDoc) -> Option<Self> {
        let timestamp = map
            .extract_str(&doc.source, "timestamp")
            .and_then(|ts| ts.parse::<DateTime<Utc>>().ok())?;
        let text = |field: &str| map.extract_str(&doc.source, field).map(str::to_owned);
        let number = |field: &str| map.extract(&doc.source, field).and_then(Value::as_u64);

        Some(Self {
            id: doc.id.clone(),
            timestamp,
            source_ip: text("source_ip"),
            destination_ip: text("destination_ip"),
            destination_port: number("destination_port").and_then(|p| u16::try_from(p).ok()),
            country: text("country"),
            asn: number("asn").and_then(|a| u32::try_from(a).ok()),
            domain: text("domain"),
            user_agent: text("user_agent"),
            ja3: text("ja3"),
            username: text("username"),
            session_id: text("session_id"),
            command: text("command"),
            file_hash: text("file_hash"),
            url: text("url"),
            event_type: text("event_type"),
        })
    }
}
