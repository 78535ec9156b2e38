//! Tool handlers for the campaign subsystem.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use talon_core::{RequestCtx, ServerError, ServerResult, ToolCategory};
use talon_query::TimeRange;
use talon_tools::{ToolDefinition, ToolHandler};

use crate::anomaly::{AnomalyMode, detect_anomalies};
use crate::event::CampaignEvent;
use crate::pipeline::{Correlator, ExpandStrategy};
use crate::score::CorrelationMethod;

/// Default minimum confidence when the caller does not set one.
const DEFAULT_MIN_CONFIDENCE: f64 = 0.25;

/// Default timeline granularity.
const DEFAULT_TIMELINE_MINUTES: i64 = 60;

fn resolve_range(args: &Value) -> ServerResult<talon_query::ResolvedRange> {
    let range = TimeRange::from_args(args)?;
    if matches!(range, TimeRange::AroundEvent { .. }) {
        return Err(ServerError::validation(
            "around_event",
            "campaign analysis takes absolute or relative ranges",
        ));
    }
    Ok(range.resolve(chrono::Utc::now(), None))
}

fn selected_methods(args: &Value) -> ServerResult<Vec<CorrelationMethod>> {
    match args.get("methods").and_then(Value::as_array) {
        None => Ok(CorrelationMethod::ALL.to_vec()),
        Some(raw_methods) => {
            let mut methods = Vec::with_capacity(raw_methods.len());
            for raw in raw_methods {
                let name = raw.as_str().unwrap_or_default();
                let method = CorrelationMethod::parse(name).ok_or_else(|| {
                    ServerError::validation("methods", format!("unknown method '{name}'"))
                })?;
                methods.push(method);
            }
            Ok(methods)
        },
    }
}

fn seeds_of(args: &Value) -> Vec<String> {
    args.get("seed_indicators")
        .and_then(Value::as_array)
        .map(|seeds| {
            seeds
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn timeline_json(timeline: &[(chrono::DateTime<chrono::Utc>, usize)]) -> Value {
    Value::Array(
        timeline
            .iter()
            .map(|(bucket, count)| json!({ "bucket_start": bucket.to_rfc3339(), "count": count }))
            .collect(),
    )
}

/// Handler for `analyze_campaign`.
pub struct AnalyzeCampaignTool(pub Arc<Correlator>);

#[async_trait]
impl ToolHandler for AnalyzeCampaignTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        let range = resolve_range(&args)?;
        let seeds = seeds_of(&args);
        let min_confidence = args
            .get("min_confidence")
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_MIN_CONFIDENCE);
        let methods = selected_methods(&args)?;

        let outcome = self
            .0
            .analyze(ctx, &seeds, range, min_confidence, &methods, DEFAULT_TIMELINE_MINUTES)
            .await?;

        let enrichment = match &outcome.campaign {
            Some(campaign) => self.0.enrich(ctx, campaign).await,
            None => Value::Null,
        };

        Ok(json!({
            "campaign": outcome.campaign,
            "score": outcome.score,
            "event_count": outcome.event_count,
            "correlation_methods_fired": outcome
                .methods
                .iter()
                .filter(|m| m.fired)
                .map(|m| m.method.as_str())
                .collect::<Vec<_>>(),
            "method_details": outcome.methods,
            "timeline": timeline_json(&outcome.timeline),
            "enrichment": enrichment,
        }))
    }
}

impl AnalyzeCampaignTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("analyze_campaign", ToolCategory::Campaign)
            .with_description("Correlate seed indicators into a scored attack campaign")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "seed_indicators": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start": { "type": "string" },
                    "end": { "type": "string" },
                    "min_confidence": { "type": "number", "minimum": 0, "maximum": 1 },
                    "methods": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["seed_indicators"],
                "additionalProperties": false
            }))
            .requires_feature("campaign_analysis")
    }
}

/// Handler for `expand_campaign_indicators`.
pub struct ExpandIndicatorsTool(pub Arc<Correlator>);

#[async_trait]
impl ToolHandler for ExpandIndicatorsTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        let range = resolve_range(&args)?;
        let seeds = seeds_of(&args);
        if seeds.is_empty() {
            return Err(ServerError::validation(
                "seed_indicators",
                "at least one indicator is required",
            ));
        }
        let strategy_raw = args
            .get("strategy")
            .and_then(Value::as_str)
            .unwrap_or("all");
        let strategy = ExpandStrategy::parse(strategy_raw).ok_or_else(|| {
            ServerError::validation(
                "strategy",
                "one of: all, network, infrastructure",
            )
        })?;
        let depth = args
            .get("depth")
            .and_then(Value::as_u64)
            .map_or(2, |d| usize::try_from(d).unwrap_or(2));

        let indicators = self
            .0
            .expand_indicators(ctx, &seeds, range, strategy, depth)
            .await?;
        Ok(json!({
            "indicators": indicators,
            "seed_count": seeds.len(),
            "strategy": strategy_raw,
            "depth": depth,
        }))
    }
}

impl ExpandIndicatorsTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("expand_campaign_indicators", ToolCategory::Campaign)
            .with_description("Iteratively broaden an indicator set through shared events")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "seed_indicators": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start": { "type": "string" },
                    "end": { "type": "string" },
                    "strategy": { "enum": ["all", "network", "infrastructure"] },
                    "depth": { "type": "integer", "minimum": 1, "maximum": 5 }
                },
                "required": ["seed_indicators"],
                "additionalProperties": false
            }))
            .requires_feature("campaign_analysis")
    }
}

/// Handler for `get_campaign_timeline`.
pub struct CampaignTimelineTool(pub Arc<Correlator>);

#[async_trait]
impl ToolHandler for CampaignTimelineTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        let range = resolve_range(&args)?;
        let seeds = seeds_of(&args);
        let granularity = args
            .get("granularity_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(DEFAULT_TIMELINE_MINUTES)
            .max(1);

        // Confidence 0: the timeline is wanted whether or not the events
        // clear a campaign bar.
        let outcome = self
            .0
            .analyze(ctx, &seeds, range, 0.0, CorrelationMethod::ALL, granularity)
            .await?;
        Ok(json!({
            "timeline": timeline_json(&outcome.timeline),
            "event_count": outcome.event_count,
            "granularity_minutes": granularity,
        }))
    }
}

impl CampaignTimelineTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("get_campaign_timeline", ToolCategory::Campaign)
            .with_description("Bucketed event timeline for a set of indicators")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "seed_indicators": {
                        "type": "array",
                        "items": { "type": "string" },
                        "minItems": 1
                    },
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start": { "type": "string" },
                    "end": { "type": "string" },
                    "granularity_minutes": { "type": "integer", "minimum": 1 }
                },
                "required": ["seed_indicators"],
                "additionalProperties": false
            }))
            .requires_feature("campaign_analysis")
    }
}

/// Handler for `detect_ongoing_campaigns`.
pub struct DetectOngoingTool(pub Arc<Correlator>);

#[async_trait]
impl ToolHandler for DetectOngoingTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        let range = resolve_range(&args)?;
        let min_confidence = args
            .get("min_confidence")
            .and_then(Value::as_f64)
            .unwrap_or(0.5);
        let campaigns = self.0.detect_ongoing(ctx, range, min_confidence).await?;
        let count = campaigns.len();
        Ok(json!({
            "campaigns": campaigns,
            "count": count,
        }))
    }
}

impl DetectOngoingTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("detect_ongoing_campaigns", ToolCategory::Campaign)
            .with_description("Scan a window for currently active campaigns above a confidence bar")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start": { "type": "string" },
                    "end": { "type": "string" },
                    "min_confidence": { "type": "number", "minimum": 0, "maximum": 1 }
                },
                "additionalProperties": false
            }))
            .requires_feature("campaign_analysis")
    }
}

/// Handler for `detect_statistical_anomalies`. Anomaly detection is
/// stateless over the event series, so the handler only needs the engine.
pub struct DetectAnomaliesTool(pub Arc<talon_query::QueryEngine>);

impl DetectAnomaliesTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new("detect_statistical_anomalies", ToolCategory::Campaign)
            .with_description(
                "Flag anomalous activity buckets using one explicit statistical mode",
            )
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "mode": { "enum": ["zscore", "iqr", "percentile"] },
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start": { "type": "string" },
                    "end": { "type": "string" },
                    "bucket_minutes": { "type": "integer", "minimum": 1 },
                    "threshold": { "type": "number" }
                },
                "required": ["mode"],
                "additionalProperties": false
            }))
            .requires_feature("elasticsearch_queries")
    }
}

#[async_trait]
impl ToolHandler for DetectAnomaliesTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        // The schema already constrains mode, but the handler still parses
        // defensively for direct library callers.
        let mode_raw = args
            .get("mode")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let mode = AnomalyMode::parse(mode_raw).ok_or_else(|| {
            ServerError::validation("mode", "one of: zscore, iqr, percentile")
        })?;
        let range = resolve_range(&args)?;
        let bucket_minutes = args
            .get("bucket_minutes")
            .and_then(Value::as_i64)
            .unwrap_or(60);
        let threshold = args.get("threshold").and_then(Value::as_f64);

        let docs = self.0.fetch_window_events(ctx, range, 20_000).await?;
        let events: Vec<CampaignEvent> = docs
            .iter()
            .filter_map(|doc| CampaignEvent::from_doc(self.0.field_map(), doc))
            .collect();

        let (anomalies, summary) = detect_anomalies(&events, bucket_minutes, mode, threshold);
        Ok(json!({
            "mode": mode_raw,
            "anomalies": anomalies,
            "series": summary,
            "event_count": events.len(),
        }))
    }
}
