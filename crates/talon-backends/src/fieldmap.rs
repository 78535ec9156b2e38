//! The user-facing field map.
//!
//! One table translates analyst-facing field names (`source_ip`) into the
//! storage names the indices actually use, with explicit fallback chains
//! (`source.ip`, then `related.ip`, then the flat `source_ip` some older
//! pipelines wrote). Lookups against documents walk the chain and handle
//! both dotted-path and flat-key representations. Unknown user-facing
//! names surface as typed validation errors upstream, never as silently
//! empty results.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// One user-facing field: its storage fallback chain and metadata for the
/// data dictionary.
#[derive(Debug, Clone, Serialize)]
pub struct FieldSpec {
    /// Storage names tried in order.
    pub storage: Vec<String>,
    /// Value type shown in the data dictionary.
    pub field_type: &'static str,
    /// Example value shown in the data dictionary.
    pub example: &'static str,
}

/// The field mapping table.
#[derive(Debug, Clone)]
pub struct FieldMap {
    fields: BTreeMap<String, FieldSpec>,
}

impl FieldMap {
    /// The DShield honeypot mapping (Cowrie and Zeek ECS layouts).
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn dshield() -> Self {
        let mut fields = BTreeMap::new();
        let mut insert = |name: &str, storage: &[&str], field_type: &'static str, example: &'static str| {
            fields.insert(
                name.to_owned(),
                FieldSpec {
                    storage: storage.iter().map(|s| (*s).to_owned()).collect(),
                    field_type,
                    example,
                },
            );
        };

        insert(
            "timestamp",
            &["@timestamp", "timestamp"],
            "date",
            "2026-07-30T12:00:00Z",
        );
        insert(
            "source_ip",
            &["source.ip", "related.ip", "source_ip"],
            "ip",
            "141.98.80.121",
        );
        insert(
            "destination_ip",
            &["destination.ip", "destination_ip"],
            "ip",
            "10.0.0.5",
        );
        insert(
            "source_port",
            &["source.port", "source_port"],
            "integer",
            "51423",
        );
        insert(
            "destination_port",
            &["destination.port", "destination_port"],
            "integer",
            "22",
        );
        insert(
            "protocol",
            &["network.transport", "protocol"],
            "keyword",
            "tcp",
        );
        insert(
            "event_type",
            &["event.type", "event_type"],
            "keyword",
            "connection",
        );
        insert(
            "event_category",
            &["event.category", "event_category"],
            "keyword",
            "network",
        );
        insert(
            "username",
            &["user.name", "username"],
            "keyword",
            "root",
        );
        insert(
            "password",
            &["cowrie.password", "password"],
            "keyword",
            "123456",
        );
        insert(
            "session_id",
            &["session.id", "cowrie.session", "session_id"],
            "keyword",
            "c0ffee01",
        );
        insert(
            "command",
            &["cowrie.input", "command"],
            "text",
            "cat /etc/passwd",
        );
        insert(
            "url",
            &["url.original", "url"],
            "keyword",
            "http://evil.example/sh",
        );
        insert(
            "domain",
            &["destination.domain", "dns.question.name", "domain"],
            "keyword",
            "evil.example",
        );
        insert(
            "file_hash",
            &["file.hash.sha256", "hashes.sha256", "file_hash"],
            "keyword",
            "e3b0c44298fc1c149afbf4c8996fb924...",
        );
        insert(
            "user_agent",
            &["user_agent.original", "http.user_agent", "user_agent"],
            "keyword",
            "curl/8.0",
        );
        insert(
            "ja3",
            &["tls.client.ja3", "ja3"],
            "keyword",
            "771,4865-4866...",
        );
        insert(
            "country",
            &["source.geo.country_iso_code", "geoip.country_code2", "country"],
            "keyword",
            "NL",
        );
        insert(
            "asn",
            &["source.as.number", "geoip.asn", "asn"],
            "integer",
            "202425",
        );
        insert(
            "severity",
            &["event.severity", "severity"],
            "integer",
            "3",
        );

        Self { fields }
    }

    /// Translate a user-facing name to its primary storage name.
    #[must_use]
    pub fn primary(&self, user_facing: &str) -> Option<&str> {
        self.fields
            .get(user_facing)
            .and_then(|spec| spec.storage.first())
            .map(String::as_str)
    }

    /// The full fallback chain for a user-facing name.
    #[must_use]
    pub fn storage_chain(&self, user_facing: &str) -> Option<&[String]> {
        self.fields.get(user_facing).map(|spec| spec.storage.as_slice())
    }

    /// Whether a user-facing name exists.
    #[must_use]
    pub fn contains(&self, user_facing: &str) -> bool {
        self.fields.contains_key(user_facing)
    }

    /// Suggest the canonical name for an unknown one: exact storage-name
    /// reverse lookup first, then a normalized-prefix heuristic.
    #[must_use]
    pub fn suggest(&self, unknown: &str) -> Option<&str> {
        for (name, spec) in &self.fields {
            if spec.storage.iter().any(|s| s == unknown) {
                return Some(name);
            }
        }
        let normalized = unknown.replace(['.', '-'], "_").to_lowercase();
        self.fields
            .keys()
            .find(|name| {
                normalized.contains(name.as_str()) || name.contains(normalized.as_str())
            })
            .map(String::as_str)
    }

    /// Extract a field value from a document, trying the fallback chain and
    /// both dotted-path and flat-key layouts.
    #[must_use]
    pub fn extract<'doc>(&self, document: &'doc Value, user_facing: &str) -> Option<&'doc Value> {
        let chain = self.fields.get(user_facing)?;
        for storage in &chain.storage {
            if let Some(value) = lookup(document, storage) {
                return Some(value);
            }
        }
        None
    }

    /// Extract as a string, when present and scalar.
    #[must_use]
    pub fn extract_str<'doc>(&self, document: &'doc Value, user_facing: &str) -> Option<&'doc str> {
        self.extract(document, user_facing).and_then(Value::as_str)
    }

    /// All user-facing names, for the data dictionary.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    /// The full table, for the data dictionary tool.
    #[must_use]
    pub fn specs(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }
}

/// Look up a storage name in a document, handling `a.b.c` both as a flat
/// key (`{"a.b.c": x}`) and as a nested path (`{"a":{"b":{"c": x}}}`).
fn lookup<'doc>(document: &'doc Value, storage: &str) -> Option<&'doc Value> {
    if let Some(flat) = document.get(storage) {
        return Some(flat);
    }
    let mut current = document;
    for segment in storage.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primary_translation() {
        let map = FieldMap::dshield();
        assert_eq!(map.primary("source_ip"), Some("source.ip"));
        assert_eq!(map.primary("timestamp"), Some("@timestamp"));
        assert_eq!(map.primary("nope"), None);
    }

    #[test]
    fn test_extract_nested() {
        let map = FieldMap::dshield();
        let doc = json!({"source": {"ip": "198.51.100.7"}});
        assert_eq!(map.extract_str(&doc, "source_ip"), Some("198.51.100.7"));
    }

    #[test]
    fn test_extract_flat_dotted_key() {
        let map = FieldMap::dshield();
        let doc = json!({"source.ip": "198.51.100.7"});
        assert_eq!(map.extract_str(&doc, "source_ip"), Some("198.51.100.7"));
    }

    #[test]
    fn test_extract_fallback_chain() {
        let map = FieldMap::dshield();
        // No source.ip; related.ip is the second link in the chain.
        let doc = json!({"related": {"ip": "198.51.100.7"}});
        assert_eq!(map.extract_str(&doc, "source_ip"), Some("198.51.100.7"));
        // Legacy flat form is the last link.
        let doc = json!({"source_ip": "198.51.100.7"});
        assert_eq!(map.extract_str(&doc, "source_ip"), Some("198.51.100.7"));
    }

    #[test]
    fn test_missing_field_is_none_not_empty() {
        let map = FieldMap::dshield();
        let doc = json!({"unrelated": 1});
        assert!(map.extract(&doc, "source_ip").is_none());
    }

    #[test]
    fn test_suggest_from_storage_name() {
        let map = FieldMap::dshield();
        assert_eq!(map.suggest("source.ip"), Some("source_ip"));
        assert_eq!(map.suggest("user.name"), Some("username"));
    }

    #[test]
    fn test_suggest_from_near_miss() {
        let map = FieldMap::dshield();
        assert_eq!(map.suggest("src-ip"), None);
        assert_eq!(map.suggest("source_ip_address"), Some("source_ip"));
    }
}
