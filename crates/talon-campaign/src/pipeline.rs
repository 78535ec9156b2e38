//! The correlation pipeline and campaign operations.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use talon_backends::ReputationService;
use talon_core::{RequestCtx, ServerError, ServerResult};
use talon_query::{QueryEngine, ResolvedRange};

use crate::campaign::{Campaign, CampaignId};
use crate::event::CampaignEvent;
use crate::indicator::Indicator;
use crate::score::{CorrelationMethod, MethodResult, combine, tier_of};
use crate::stages::run_stage;

/// Cap on events fetched per indicator during seed expansion.
const EVENTS_PER_INDICATOR: usize = 5000;

/// Cap on total events per analysis.
const MAX_ANALYSIS_EVENTS: usize = 20_000;

/// Cap on indicators carried into expansion rounds.
const MAX_EXPANSION_INDICATORS: usize = 200;

/// Cap on campaigns returned by ongoing detection.
const MAX_ONGOING_CAMPAIGNS: usize = 10;

/// Cap on indicators one fired stage feeds forward as additional seeds.
const FEED_FORWARD_PER_STAGE: usize = 10;

/// Indicator-expansion strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandStrategy {
    /// Re-run every stage's indicator surface.
    All,
    /// Only network-adjacent indicators (source addresses).
    Network,
    /// Only infrastructure indicators (domains, hashes).
    Infrastructure,
}

impl ExpandStrategy {
    /// Parse the tool argument.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "all" => Some(Self::All),
            "network" => Some(Self::Network),
            "infrastructure" => Some(Self::Infrastructure),
            _ => None,
        }
    }
}

/// A finished analysis: the campaign (when it met the confidence bar),
/// the per-method results, and the timeline.
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// The campaign, when the score cleared `min_confidence`.
    pub campaign: Option<Campaign>,
    /// The score, whether or not it cleared the bar.
    pub score: f64,
    /// Per-method results, in pipeline order.
    pub methods: Vec<MethodResult>,
    /// Events bucketed by the timeline granularity.
    pub timeline: Vec<(DateTime<Utc>, usize)>,
    /// Number of correlated events.
    pub event_count: usize,
}

/// Runs the correlation pipeline over seed indicators.
pub struct Correlator {
    engine: Arc<QueryEngine>,
    intel: Option<Arc<dyn ReputationService>>,
}

impl Correlator {
    /// Create a correlator. `intel` is optional; without it campaigns are
    /// simply not enriched.
    #[must_use]
    pub fn new(engine: Arc<QueryEngine>, intel: Option<Arc<dyn ReputationService>>) -> Self {
        Self { engine, intel }
    }

    /// Fetch events for a set of indicators into the working set,
    /// deduplicating by document id. Returns how many events were added.
    async fn fetch_into(
        &self,
        ctx: &RequestCtx,
        indicators: &[String],
        range: ResolvedRange,
        seen: &mut HashSet<String>,
        events: &mut Vec<CampaignEvent>,
    ) -> ServerResult<usize> {
        let mut added = 0usize;
        for indicator in indicators {
            if events.len() >= MAX_ANALYSIS_EVENTS {
                tracing::warn!(cap = MAX_ANALYSIS_EVENTS, "analysis event cap reached");
                break;
            }
            let docs = self
                .engine
                .fetch_indicator_events(ctx, indicator, range, EVENTS_PER_INDICATOR)
                .await?;
            for doc in &docs {
                if events.len() >= MAX_ANALYSIS_EVENTS {
                    break;
                }
                if seen.insert(doc.id.clone()) {
                    if let Some(event) = CampaignEvent::from_doc(self.engine.field_map(), doc) {
                        events.push(event);
                        added += 1;
                    }
                }
            }
        }
        Ok(added)
    }

    /// Run the full pipeline.
    ///
    /// # Errors
    ///
    /// Empty or unclassifiable seeds are validation errors; backend
    /// failures propagate typed.
    pub async fn analyze(
        &self,
        ctx: &RequestCtx,
        raw_seeds: &[String],
        range: ResolvedRange,
        min_confidence: f64,
        selected: &[CorrelationMethod],
        timeline_bucket_minutes: i64,
    ) -> ServerResult<AnalysisOutcome> {
        if raw_seeds.is_empty() {
            return Err(ServerError::validation(
                "seed_indicators",
                "at least one seed indicator is required",
            ));
        }
        let seeds: Vec<Indicator> = raw_seeds
            .iter()
            .map(|raw| {
                Indicator::classify(raw).ok_or_else(|| {
                    ServerError::validation(
                        "seed_indicators",
                        format!("'{raw}' is not an IP, domain, or hash"),
                    )
                })
            })
            .collect::<ServerResult<_>>()?;

        // Stage 1: seed expansion.
        let seed_strings: Vec<String> = seeds.iter().map(Indicator::as_query_value).collect();
        let mut visited: HashSet<String> = seed_strings.iter().cloned().collect();
        let mut seen_events: HashSet<String> = HashSet::new();
        let mut events: Vec<CampaignEvent> = Vec::new();
        self.fetch_into(ctx, &seed_strings, range, &mut seen_events, &mut events)
            .await?;
        tracing::info!(
            seeds = seeds.len(),
            events = events.len(),
            "seed expansion complete"
        );

        // Stages 2–7, each stage's output feeding the next as additional
        // seeds: indicators a fired stage surfaces pull their events into
        // the working set before the next stage runs. The visited set
        // keeps re-surfaced indicators from re-fetching.
        let ordered: Vec<CorrelationMethod> = CorrelationMethod::ALL
            .iter()
            .filter(|method| selected.contains(method))
            .copied()
            .collect();
        let mut methods = Vec::with_capacity(ordered.len());
        for (index, method) in ordered.iter().enumerate() {
            let result = run_stage(*method, &events);
            let is_last = index + 1 == ordered.len();
            if result.fired && !is_last {
                let fresh: Vec<String> = result
                    .indicators
                    .iter()
                    .filter(|raw| Indicator::classify(raw).is_some())
                    .filter(|raw| !visited.contains(raw.as_str()))
                    .take(FEED_FORWARD_PER_STAGE)
                    .cloned()
                    .collect();
                if !fresh.is_empty() {
                    visited.extend(fresh.iter().cloned());
                    let added = self
                        .fetch_into(ctx, &fresh, range, &mut seen_events, &mut events)
                        .await?;
                    if added > 0 {
                        tracing::debug!(
                            method = %result.method,
                            fed = fresh.len(),
                            added,
                            "stage output fed forward as additional seeds"
                        );
                    }
                }
            }
            methods.push(result);
        }
        let score = combine(&methods);
        let timeline = bucket_timeline(&events, timeline_bucket_minutes);

        let campaign = if score >= min_confidence && !events.is_empty() {
            let start = events.iter().map(|e| e.timestamp).min().unwrap_or(range.start);
            let end = events.iter().map(|e| e.timestamp).max().unwrap_or(range.end);

            let mut related: BTreeSet<String> = BTreeSet::new();
            for method in &methods {
                if method.fired {
                    related.extend(method.indicators.iter().cloned());
                }
            }
            for seed in &seed_strings {
                related.remove(seed);
            }

            // The id hashes the seeds plus the correlated event span (not
            // the resolved query window), so re-running a relative window
            // over a stable dataset names the same campaign.
            Some(Campaign {
                id: CampaignId::derive(&seed_strings, start, end),
                seed_indicators: seed_strings,
                score,
                confidence: tier_of(score),
                start,
                end,
                related_indicators: related.into_iter().collect(),
                event_ids: events.iter().map(|e| e.id.clone()).collect(),
                correlation_methods_fired: methods
                    .iter()
                    .filter(|m| m.fired)
                    .map(|m| m.method)
                    .collect(),
            })
        } else {
            None
        };

        Ok(AnalysisOutcome {
            campaign,
            score,
            methods,
            timeline,
            event_count: events.len(),
        })
    }

    /// Annotate a campaign's top indicators with vendor reputation.
    /// Degrades silently when enrichment is unavailable.
    pub async fn enrich(&self, ctx: &RequestCtx, campaign: &Campaign) -> Value {
        let Some(intel) = &self.intel else {
            return Value::Null;
        };
        let ips: Vec<String> = campaign
            .seed_indicators
            .iter()
            .chain(campaign.related_indicators.iter())
            .filter(|raw| raw.parse::<std::net::IpAddr>().is_ok())
            .take(10)
            .cloned()
            .collect();
        match intel.batch_reputation(ctx, &ips).await {
            Ok(reputations) => serde_json::to_value(reputations).unwrap_or(Value::Null),
            Err(e) => {
                tracing::debug!(error = %e, "enrichment unavailable, continuing without");
                Value::Null
            },
        }
    }

    /// Iteratively broaden a campaign's indicator set.
    ///
    /// Each round fetches events for the frontier indicators, surfaces new
    /// ones via the strategy's stages, and repeats up to `depth` rounds.
    /// Visited indicators are never re-fetched, so cycles terminate.
    ///
    /// # Errors
    ///
    /// Backend failures propagate typed.
    pub async fn expand_indicators(
        &self,
        ctx: &RequestCtx,
        start_indicators: &[String],
        range: ResolvedRange,
        strategy: ExpandStrategy,
        depth: usize,
    ) -> ServerResult<Vec<String>> {
        let mut visited: BTreeSet<String> = start_indicators.iter().cloned().collect();
        let mut frontier: Vec<String> = start_indicators.to_vec();

        for round in 0..depth.min(5) {
            if frontier.is_empty() || visited.len() >= MAX_EXPANSION_INDICATORS {
                break;
            }
            let mut next: BTreeSet<String> = BTreeSet::new();
            for indicator in &frontier {
                if ctx.is_cancelled() {
                    return Err(ServerError::Internal("request cancelled".to_owned()));
                }
                let docs = self
                    .engine
                    .fetch_indicator_events(ctx, indicator, range, EVENTS_PER_INDICATOR)
                    .await?;
                for doc in &docs {
                    let Some(event) = CampaignEvent::from_doc(self.engine.field_map(), doc)
                    else {
                        continue;
                    };
                    for surfaced in surfaced_indicators(&event, strategy) {
                        if !visited.contains(&surfaced) {
                            next.insert(surfaced);
                        }
                    }
                }
            }
            tracing::debug!(round, new = next.len(), "indicator expansion round");
            frontier = next
                .into_iter()
                .take(MAX_EXPANSION_INDICATORS.saturating_sub(visited.len()))
                .collect();
            visited.extend(frontier.iter().cloned());
        }
        Ok(visited.into_iter().collect())
    }

    /// Similarity of two campaigns over indicator overlap, TTP overlap,
    /// and temporal proximity. Returns `[0, 1]` plus the components.
    #[must_use]
    pub fn compare(a: &Campaign, b: &Campaign) -> (f64, Value) {
        let indicators_a: BTreeSet<&String> = a
            .seed_indicators
            .iter()
            .chain(a.related_indicators.iter())
            .collect();
        let indicators_b: BTreeSet<&String> = b
            .seed_indicators
            .iter()
            .chain(b.related_indicators.iter())
            .collect();
        let indicator_overlap = jaccard(&indicators_a, &indicators_b);

        let methods_a: BTreeSet<&CorrelationMethod> =
            a.correlation_methods_fired.iter().collect();
        let methods_b: BTreeSet<&CorrelationMethod> =
            b.correlation_methods_fired.iter().collect();
        let ttp_overlap = jaccard(&methods_a, &methods_b);

        let temporal = window_overlap(a.start, a.end, b.start, b.end);

        let similarity = 0.5 * indicator_overlap + 0.3 * ttp_overlap + 0.2 * temporal;
        (
            similarity,
            json!({
                "indicator_overlap": indicator_overlap,
                "ttp_overlap": ttp_overlap,
                "temporal_proximity": temporal,
            }),
        )
    }

    /// Scan a window for active campaigns: take the busiest source
    /// subnets as seed candidates and analyze each. Idempotent over a
    /// stable dataset and bounded in output size.
    ///
    /// # Errors
    ///
    /// Backend failures propagate typed.
    pub async fn detect_ongoing(
        &self,
        ctx: &RequestCtx,
        range: ResolvedRange,
        min_confidence: f64,
    ) -> ServerResult<Vec<Campaign>> {
        // Top talkers give deterministic candidate seeds.
        let candidates = self.top_talkers(ctx, range).await?;
        let mut campaigns = Vec::new();
        for candidate in candidates {
            if campaigns.len() >= MAX_ONGOING_CAMPAIGNS {
                break;
            }
            let outcome = self
                .analyze(
                    ctx,
                    &[candidate],
                    range,
                    min_confidence,
                    CorrelationMethod::ALL,
                    60,
                )
                .await?;
            if let Some(campaign) = outcome.campaign {
                campaigns.push(campaign);
            }
        }
        campaigns.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(campaigns)
    }

    async fn top_talkers(&self, ctx: &RequestCtx, range: ResolvedRange) -> ServerResult<Vec<String>> {
        // A bounded page of recent events is enough to rank sources.
        let docs = self
            .engine
            .fetch_window_events(ctx, range, EVENTS_PER_INDICATOR)
            .await?;
        let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        for doc in &docs {
            if let Some(event) = CampaignEvent::from_doc(self.engine.field_map(), doc) {
                if let Some(ip) = event.source_ip {
                    *counts.entry(ip).or_insert(0) += 1;
                }
            }
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked
            .into_iter()
            .take(MAX_ONGOING_CAMPAIGNS)
            .map(|(ip, _)| ip)
            .collect())
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("enrichment", &self.intel.is_some())
            .finish_non_exhaustive()
    }
}

/// Indicators an event surfaces under a strategy.
fn surfaced_indicators(event: &CampaignEvent, strategy: ExpandStrategy) -> Vec<String> {
    let mut surfaced = Vec::new();
    if matches!(strategy, ExpandStrategy::All | ExpandStrategy::Network) {
        surfaced.extend(event.source_ip.clone());
        surfaced.extend(event.destination_ip.clone());
    }
    if matches!(strategy, ExpandStrategy::All | ExpandStrategy::Infrastructure) {
        surfaced.extend(event.domain.clone());
        surfaced.extend(event.file_hash.clone());
    }
    surfaced
}

/// Events bucketed by granularity, oldest bucket first.
fn bucket_timeline(events: &[CampaignEvent], bucket_minutes: i64) -> Vec<(DateTime<Utc>, usize)> {
    let bucket_seconds = Duration::minutes(bucket_minutes.max(1)).num_seconds();
    let mut counts: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
    for event in events {
        let slot = event.timestamp.timestamp().div_euclid(bucket_seconds);
        *counts.entry(slot).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(slot, count)| {
            (
                DateTime::from_timestamp(slot * bucket_seconds, 0).unwrap_or_default(),
                count,
            )
        })
        .collect()
}

fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    #[allow(clippy::cast_precision_loss)]
    let score = intersection as f64 / union.max(1) as f64;
    score
}

/// Overlap of two windows relative to the shorter one.
fn window_overlap(
    start_a: DateTime<Utc>,
    end_a: DateTime<Utc>,
    start_b: DateTime<Utc>,
    end_b: DateTime<Utc>,
) -> f64 {
    let overlap_start = start_a.max(start_b);
    let overlap_end = end_a.min(end_b);
    if overlap_end <= overlap_start {
        return 0.0;
    }
    let overlap = (overlap_end - overlap_start).num_seconds();
    let shorter = (end_a - start_a)
        .num_seconds()
        .min((end_b - start_b).num_seconds())
        .max(1);
    #[allow(clippy::cast_precision_loss)]
    let score = overlap as f64 / shorter as f64;
    score.clamp(0.0, 1.0)
}
