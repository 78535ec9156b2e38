//! Indicator classification.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A pivot observable: IP address, domain, or file hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Indicator {
    /// An IPv4 or IPv6 address.
    Ip(IpAddr),
    /// A DNS domain.
    Domain(String),
    /// A file hash (hex, 32/40/64 chars).
    Hash(String),
}

impl Indicator {
    /// Classify a raw string.
    ///
    /// IPs parse strictly; hex strings of MD5/SHA-1/SHA-256 length are
    /// hashes; anything with a dot and no spaces is a domain.
    #[must_use]
    pub fn classify(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if let Ok(ip) = raw.parse::<IpAddr>() {
            return Some(Self::Ip(ip));
        }
        let is_hex = !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_hexdigit());
        if is_hex && matches!(raw.len(), 32 | 40 | 64) {
            return Some(Self::Hash(raw.to_lowercase()));
        }
        if raw.contains('.') && !raw.contains(char::is_whitespace) && !raw.contains('/') {
            return Some(Self::Domain(raw.to_lowercase()));
        }
        None
    }

    /// The raw string form used in queries and campaign records.
    #[must_use]
    pub fn as_query_value(&self) -> String {
        match self {
            Self::Ip(ip) => ip.to_string(),
            Self::Domain(domain) | Self::Hash(domain) => domain.clone(),
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ip(ip) => write!(f, "ip:{ip}"),
            Self::Domain(domain) => write!(f, "domain:{domain}"),
            Self::Hash(hash) => write!(f, "hash:{hash}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ip_classification() {
        assert!(matches!(
            Indicator::classify("141.98.80.121"),
            Some(Indicator::Ip(_))
        ));
        assert!(matches!(
            Indicator::classify("2001:db8::1"),
            Some(Indicator::Ip(_))
        ));
    }

    #[test]
    fn test_hash_classification() {
        let sha256 = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";
        assert!(matches!(
            Indicator::classify(sha256),
            Some(Indicator::Hash(_))
        ));
        let md5 = "d41d8cd98f00b204e9800998ecf8427e";
        assert!(matches!(Indicator::classify(md5), Some(Indicator::Hash(_))));
    }

    #[test]
    fn test_domain_classification() {
        assert_eq!(
            Indicator::classify("Evil.Example"),
            Some(Indicator::Domain("evil.example".to_owned()))
        );
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(Indicator::classify(""), None);
        assert_eq!(Indicator::classify("not an indicator"), None);
        assert_eq!(Indicator::classify("path/with/slashes.sh"), None);
    }
}
