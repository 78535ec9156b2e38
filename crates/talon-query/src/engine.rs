//! The query engine and its tool handlers.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use talon_backends::fieldmap::FieldMap;
use talon_backends::{BackendError, EventDoc, EventStore, SearchRequest};
use talon_breaker::CircuitBreaker;
use talon_config::{QueryConfig, StreamingConfig};
use talon_core::{RequestCtx, RetryConfig, ServerError, ServerResult, ToolCategory, retry};
use talon_tools::{ToolDefinition, ToolHandler};

use crate::builder::{build_indicator_query, build_query, storage_projection};
use crate::cursor;
use crate::metrics::PerformanceMetrics;
use crate::optimize::{ESSENTIAL_FIELDS, Plan, plan};
use crate::params::QueryParams;
use crate::stream::{SessionChunk, StreamOutcome, pack_session_chunks};
use crate::timerange::{ResolvedRange, TimeRange};

/// Backend service name for breaker state and error payloads.
const SERVICE: &str = "elasticsearch";

/// Offset pagination cap (`from + size`), matching backend defaults.
const OFFSET_CAP: usize = 10_000;

/// Fields an indicator may appear in, for seed expansion.
const RELATED_FIELDS: &[&str] = &["source_ip", "destination_ip", "domain", "file_hash", "url"];

/// Turns user-facing query parameters into backend requests and back.
pub struct QueryEngine {
    store: Arc<dyn EventStore>,
    map: FieldMap,
    query_config: QueryConfig,
    streaming_config: StreamingConfig,
    breaker: Arc<CircuitBreaker>,
    retry_config: RetryConfig,
}

impl QueryEngine {
    /// Create the engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn EventStore>,
        breaker: Arc<CircuitBreaker>,
        query_config: QueryConfig,
        streaming_config: StreamingConfig,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            store,
            map: FieldMap::dshield(),
            query_config,
            streaming_config,
            breaker,
            retry_config,
        }
    }

    /// The field map (shared with the correlator and the data dictionary).
    #[must_use]
    pub fn field_map(&self) -> &FieldMap {
        &self.map
    }

    /// Run one backend operation behind the breaker with bounded retry for
    /// transient failures.
    async fn guarded<T, Op, Fut>(&self, ctx: &RequestCtx, op: Op) -> ServerResult<T>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        if let Err(rejected) = self.breaker.try_acquire() {
            return Err(ServerError::CircuitOpen {
                service: SERVICE.to_owned(),
                retry_after_seconds: rejected.retry_after_seconds,
            });
        }
        let result = retry(
            &self.retry_config,
            &ctx.cancel,
            BackendError::is_transient,
            op,
        )
        .await;
        match result {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            },
            Err(err) => {
                if err.is_matched_failure() {
                    self.breaker.record_failure();
                }
                Err(err.into_server_error(SERVICE))
            },
        }
    }

    async fn count(&self, ctx: &RequestCtx, query: &Value) -> ServerResult<u64> {
        self.guarded(ctx, || self.store.count(ctx, query)).await
    }

    async fn search(
        &self,
        ctx: &RequestCtx,
        request: &SearchRequest,
    ) -> ServerResult<talon_backends::SearchResponse> {
        self.guarded(ctx, || self.store.search(ctx, request.clone()))
            .await
    }

    /// Resolve a time range, looking up the anchor event when needed.
    async fn resolve_range(
        &self,
        ctx: &RequestCtx,
        range: &TimeRange,
    ) -> ServerResult<ResolvedRange> {
        let event_time = match range {
            TimeRange::AroundEvent { event_id, .. } => {
                let query = json!({ "ids": { "values": [event_id] } });
                let request = SearchRequest {
                    query,
                    from: None,
                    size: 1,
                    search_after: None,
                    fields: None,
                };
                let response = self.search(ctx, &request).await?;
                let hit = response.hits.into_iter().next().ok_or_else(|| {
                    ServerError::ResourceNotFound {
                        resource: format!("event:{event_id}"),
                    }
                })?;
                Some(
                    self.map
                        .extract_str(&hit.source, "timestamp")
                        .and_then(|ts| ts.parse().ok())
                        .ok_or_else(|| {
                            ServerError::Internal("anchor event has no timestamp".to_owned())
                        })?,
                )
            },
            _ => None,
        };
        Ok(range.resolve(chrono::Utc::now(), event_time))
    }

    /// The `query_dshield_events` tool.
    ///
    /// # Errors
    ///
    /// Validation failures, backend failures, breaker-open, and the
    /// oversized-result fallback all surface as typed errors.
    pub async fn query_events(&self, ctx: &RequestCtx, args: &Value) -> ServerResult<Value> {
        let params = QueryParams::from_args(args, &self.map)?;
        let range = self.resolve_range(ctx, &params.time_range).await?;
        let query = build_query(&params.filters, range, &self.map);

        let requested_size = params
            .page_size
            .unwrap_or(self.query_config.default_page_size)
            .min(self.query_config.max_page_size);
        let from = params.from.unwrap_or(0);
        if from.saturating_add(requested_size) > OFFSET_CAP {
            return Err(ServerError::validation(
                "from",
                format!("offset pagination is capped at {OFFSET_CAP} documents; use a cursor"),
            ));
        }

        // Count first; the optimizer decides what actually executes.
        let total = self.count(ctx, &query).await?;
        let caller_paginates = params.cursor.is_some() || params.from.is_some();
        let decision = plan(
            total,
            requested_size,
            params.fields.is_some(),
            caller_paginates,
            self.query_config.max_result_size_bytes(),
            self.query_config.fallback_strategy,
        )?;

        match decision {
            Plan::Search {
                size,
                essential_fields,
                optimizations,
            } => {
                if !optimizations.is_empty() {
                    tracing::debug!(total, size, ?optimizations, "query optimization applied");
                }
                self.run_search(ctx, &params, &query, total, size, essential_fields, optimizations)
                    .await
            },
            Plan::Aggregate { optimizations } => {
                self.run_aggregation_summary(ctx, &query, total, optimizations)
                    .await
            },
            Plan::Sample {
                size,
                optimizations,
            } => {
                let sampled = json!({
                    "function_score": {
                        "query": query,
                        "random_score": {},
                    }
                });
                let mut params = params.clone();
                params.fields = None;
                self.run_search(ctx, &params, &sampled, total, size, true, optimizations)
                    .await
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_search(
        &self,
        ctx: &RequestCtx,
        params: &QueryParams,
        query: &Value,
        total: u64,
        size: usize,
        essential_fields: bool,
        optimizations: Vec<String>,
    ) -> ServerResult<Value> {
        let projection = if essential_fields {
            Some(storage_projection(
                &ESSENTIAL_FIELDS
                    .iter()
                    .map(|f| (*f).to_owned())
                    .collect::<Vec<_>>(),
                &self.map,
            ))
        } else {
            params
                .fields
                .as_ref()
                .map(|fields| storage_projection(fields, &self.map))
        };

        let search_after = params.cursor.as_deref().map(cursor::decode).transpose()?;
        let request = SearchRequest {
            query: query.clone(),
            from: if search_after.is_none() { params.from } else { None },
            size,
            search_after,
            fields: projection,
        };
        let response = self.search(ctx, &request).await?;

        let next_cursor = (response.hits.len() == size)
            .then(|| response.hits.last().and_then(|h| h.sort.as_ref()).map(cursor::encode))
            .flatten();

        let metrics = PerformanceMetrics {
            query_time_ms: response.took_ms,
            indices_scanned: response.indices.len(),
            total_documents_examined: total,
            shards_scanned: response.shards,
            query_complexity: PerformanceMetrics::classify(
                params.filters.len(),
                params.fields.is_some() || essential_fields,
                false,
            ),
            optimizations_applied: optimizations,
            aggregations_used: Vec::new(),
        };

        Ok(json!({
            "events": response.hits.iter().map(doc_json).collect::<Vec<_>>(),
            "total": total,
            "returned": response.hits.len(),
            "cursor": next_cursor,
            "performance_metrics": metrics,
        }))
    }

    async fn run_aggregation_summary(
        &self,
        ctx: &RequestCtx,
        query: &Value,
        total: u64,
        optimizations: Vec<String>,
    ) -> ServerResult<Value> {
        let aggs = json!({
            "top_sources": { "terms": { "field": "source.ip", "size": 10 } },
            "event_types": { "terms": { "field": "event.type", "size": 10 } },
            "events_over_time": {
                "date_histogram": { "field": "@timestamp", "fixed_interval": "1h" }
            },
        });
        let aggregations = self
            .guarded(ctx, || self.store.aggregate(ctx, query, &aggs))
            .await?;

        let metrics = PerformanceMetrics {
            query_time_ms: 0,
            indices_scanned: 0,
            total_documents_examined: total,
            shards_scanned: 0,
            query_complexity: PerformanceMetrics::classify(0, false, true),
            optimizations_applied: optimizations,
            aggregations_used: vec![
                "top_sources".to_owned(),
                "event_types".to_owned(),
                "events_over_time".to_owned(),
            ],
        };

        Ok(json!({
            "events": [],
            "total": total,
            "returned": 0,
            "aggregations": aggregations,
            "performance_metrics": metrics,
        }))
    }

    /// The `stream_dshield_events_with_session_context` tool.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`QueryEngine::query_events`].
    pub async fn stream_events(&self, ctx: &RequestCtx, args: &Value) -> ServerResult<Value> {
        let params = QueryParams::from_args(args, &self.map)?;
        let range = self.resolve_range(ctx, &params.time_range).await?;
        let query = build_query(&params.filters, range, &self.map);

        let chunk_size = args
            .get("chunk_size")
            .and_then(Value::as_u64)
            .map_or(self.streaming_config.default_chunk_size, |n| {
                usize::try_from(n).unwrap_or(self.streaming_config.default_chunk_size)
            })
            .max(1);
        let max_chunks = args
            .get("max_chunks")
            .and_then(Value::as_u64)
            .map_or(self.streaming_config.max_chunks, |n| {
                usize::try_from(n).unwrap_or(self.streaming_config.max_chunks)
            })
            .clamp(1, self.streaming_config.max_chunks);
        let group_by_session = args
            .get("group_by_session")
            .and_then(Value::as_bool)
            .unwrap_or(true);

        let mut after = params.cursor.as_deref().map(cursor::decode).transpose()?;
        let mut fetched: Vec<EventDoc> = Vec::new();
        let mut plain_chunks: Vec<SessionChunk> = Vec::new();
        let mut exhausted = false;

        for _ in 0..max_chunks {
            if ctx.is_cancelled() {
                return Err(ServerError::Internal("request cancelled".to_owned()));
            }
            // Over-fetch by one to learn whether the stream continues.
            let request = SearchRequest {
                query: query.clone(),
                from: None,
                size: chunk_size.saturating_add(1),
                search_after: after.clone(),
                fields: None,
            };
            let response = self.search(ctx, &request).await?;
            let mut hits = response.hits;
            let more = hits.len() > chunk_size;
            hits.truncate(chunk_size);

            if hits.is_empty() {
                exhausted = true;
                break;
            }
            after = hits.last().and_then(|h| h.sort.clone());

            if group_by_session {
                fetched.extend(hits);
            } else {
                let chunk_cursor = if more {
                    after.as_ref().map(cursor::encode)
                } else {
                    None
                };
                plain_chunks.push(SessionChunk {
                    events: hits.iter().map(doc_json).collect(),
                    session_keys: Vec::new(),
                    boundary: false,
                    cursor: chunk_cursor,
                });
            }

            if !more {
                exhausted = true;
                break;
            }
        }

        let final_cursor = if exhausted {
            None
        } else {
            after.as_ref().map(cursor::encode)
        };

        let chunks = if group_by_session {
            pack_session_chunks(&fetched, &self.map, chunk_size)
                .into_iter()
                .map(|(events, session_keys, boundary)| SessionChunk {
                    events: events.iter().map(doc_json).collect(),
                    session_keys,
                    boundary,
                    cursor: None,
                })
                .collect()
        } else {
            plain_chunks
        };

        let total_events: usize = chunks.iter().map(|c| c.events.len()).sum();
        let outcome = StreamOutcome {
            summary: json!({
                "total_events": total_events,
                "chunk_count": chunks.len(),
                "chunk_size": chunk_size,
                "exhausted": exhausted,
                "grouped_by_session": group_by_session,
            }),
            chunks,
            final_cursor,
        };
        serde_json::to_value(&outcome)
            .map_err(|e| ServerError::Internal(format!("cannot serialize stream result: {e}")))
    }

    /// Fetch the events an indicator appears in (seed expansion).
    ///
    /// # Errors
    ///
    /// Backend and breaker failures surface as typed errors.
    pub async fn fetch_indicator_events(
        &self,
        ctx: &RequestCtx,
        indicator: &str,
        range: ResolvedRange,
        limit: usize,
    ) -> ServerResult<Vec<EventDoc>> {
        let query = build_indicator_query(indicator, RELATED_FIELDS, range, &self.map);
        let request = SearchRequest {
            query,
            from: None,
            size: limit,
            search_after: None,
            fields: None,
        };
        Ok(self.search(ctx, &request).await?.hits)
    }

    /// Fetch a bounded page of events in a window, no filters.
    ///
    /// # Errors
    ///
    /// Backend and breaker failures surface as typed errors.
    pub async fn fetch_window_events(
        &self,
        ctx: &RequestCtx,
        range: ResolvedRange,
        limit: usize,
    ) -> ServerResult<Vec<EventDoc>> {
        let query = build_query(&[], range, &self.map);
        let request = SearchRequest {
            query,
            from: None,
            size: limit,
            search_after: None,
            fields: None,
        };
        Ok(self.search(ctx, &request).await?.hits)
    }

    /// The field catalog for the `get_data_dictionary` tool and resource.
    #[must_use]
    pub fn data_dictionary(&self) -> Value {
        let fields: Vec<Value> = self
            .map
            .specs()
            .iter()
            .map(|(name, spec)| {
                json!({
                    "name": name,
                    "storage_fallbacks": spec.storage,
                    "type": spec.field_type,
                    "example": spec.example,
                })
            })
            .collect();
        json!({ "fields": fields })
    }
}

/// Flatten a hit into its source body with `_id` attached.
fn doc_json(doc: &EventDoc) -> Value {
    let mut body = doc.source.clone();
    if let Some(obj) = body.as_object_mut() {
        obj.insert("_id".to_owned(), Value::from(doc.id.clone()));
    }
    body
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine").finish_non_exhaustive()
    }
}

/// Handler for `query_dshield_events`.
pub struct QueryEventsTool(pub Arc<QueryEngine>);

#[async_trait]
impl ToolHandler for QueryEventsTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        self.0.query_events(ctx, &args).await
    }
}

impl QueryEventsTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition(timeout_seconds: u64) -> ToolDefinition {
        ToolDefinition::new("query_dshield_events", ToolCategory::Query)
            .with_description("Query DShield honeypot events with filters, time ranges, and pagination")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "time_range_hours": { "type": "integer", "minimum": 1 },
                    "start": { "type": "string" },
                    "end": { "type": "string" },
                    "around_event": {
                        "type": "object",
                        "properties": {
                            "event_id": { "type": "string" },
                            "window_minutes": { "type": "integer", "minimum": 1 }
                        },
                        "required": ["event_id"]
                    },
                    "filters": { "type": "object" },
                    "fields": { "type": "array", "items": { "type": "string" } },
                    "page_size": { "type": "integer", "minimum": 1 },
                    "from": { "type": "integer", "minimum": 0 },
                    "cursor": { "type": "string" }
                },
                "additionalProperties": false
            }))
            .requires_feature("elasticsearch_queries")
            .with_timeout(std::time::Duration::from_secs(timeout_seconds))
    }
}

/// Handler for `stream_dshield_events_with_session_context`.
pub struct StreamEventsTool(pub Arc<QueryEngine>);

#[async_trait]
impl ToolHandler for StreamEventsTool {
    async fn call(&self, ctx: &RequestCtx, args: Value) -> ServerResult<Value> {
        self.0.stream_events(ctx, &args).await
    }
}

impl StreamEventsTool {
    /// The tool definition published in `tools/list`.
    #[must_use]
    pub fn definition(timeout_seconds: u64) -> ToolDefinition {
        ToolDefinition::new(
            "stream_dshield_events_with_session_context",
            ToolCategory::Query,
        )
        .with_description(
            "Stream large result sets in bounded chunks, grouping events by session",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "time_range_hours": { "type": "integer", "minimum": 1 },
                "start": { "type": "string" },
                "end": { "type": "string" },
                "filters": { "type": "object" },
                "chunk_size": { "type": "integer", "minimum": 1 },
                "max_chunks": { "type": "integer", "minimum": 1 },
                "group_by_session": { "type": "boolean" },
                "cursor": { "type": "string" }
            },
            "additionalProperties": false
        }))
        .requires_feature("elasticsearch_queries")
        .with_timeout(std::time::Duration::from_secs(timeout_seconds))
    }
}
