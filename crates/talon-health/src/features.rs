//! The static feature map.

/// One feature and the backends it needs.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSpec {
    /// Feature id, referenced by tool definitions.
    pub id: &'static str,
    /// Backend health names that must all be healthy.
    pub dependencies: &'static [&'static str],
}

/// Every feature the server knows. Loaded once; tools reference these ids.
pub const FEATURES: &[FeatureSpec] = &[
    FeatureSpec {
        id: "elasticsearch_queries",
        dependencies: &["elasticsearch"],
    },
    FeatureSpec {
        id: "campaign_analysis",
        dependencies: &["elasticsearch"],
    },
    FeatureSpec {
        id: "threat_enrichment",
        dependencies: &["threat_intel"],
    },
    FeatureSpec {
        id: "pdf_reports",
        dependencies: &["report_renderer"],
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_ids_are_unique() {
        let mut ids: Vec<&str> = FEATURES.iter().map(|f| f.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), FEATURES.len());
    }
}
