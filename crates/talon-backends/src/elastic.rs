//! Elasticsearch HTTP client.
//!
//! A narrow client: `count`, `search`, `aggregate`, `health`. Requests are
//! built as raw query DSL by the query engine; this adapter owns the wire
//! concerns (auth, TLS, compatibility headers, deadlines, cancellation) and
//! the response decoding into [`SearchResponse`].

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::Duration;

use talon_config::ElasticsearchConfig;
use talon_core::RequestCtx;

use crate::error::{BackendError, BackendResult};
use crate::health::HealthStatus;
use crate::traits::{EventDoc, EventStore, SearchRequest, SearchResponse, SortKey};

/// The reqwest-backed Elasticsearch adapter.
pub struct ElasticClient {
    http: reqwest::Client,
    base_url: String,
    index_pattern: String,
    username: String,
    password: String,
    compatibility_mode: bool,
    timeout: Duration,
}

impl ElasticClient {
    /// Build the client from config.
    ///
    /// # Errors
    ///
    /// Returns an error when the underlying HTTP client cannot be built.
    pub fn new(config: &ElasticsearchConfig, timeout_seconds: u64) -> BackendResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!config.verify_ssl)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_owned(),
            index_pattern: config.index_pattern(),
            username: config.username.clone(),
            password: config.password.clone(),
            compatibility_mode: config.compatibility_mode,
            timeout: Duration::from_secs(timeout_seconds),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.http.request(method, format!("{}{path}", self.base_url));
        if !self.username.is_empty() {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        if self.compatibility_mode {
            builder = builder.header(
                reqwest::header::ACCEPT,
                "application/vnd.elasticsearch+json; compatible-with=8",
            );
            builder = builder.header(
                reqwest::header::CONTENT_TYPE,
                "application/vnd.elasticsearch+json; compatible-with=8",
            );
        }
        builder
    }

    /// Execute a request with deadline and cancellation, decode JSON.
    async fn execute(&self, ctx: &RequestCtx, builder: reqwest::RequestBuilder) -> BackendResult<Value> {
        let fut = async {
            let response = builder.send().await.map_err(classify_reqwest)?;
            let status = response.status();
            let body: Value = response
                .json()
                .await
                .map_err(|e| BackendError::Decode(e.to_string()))?;
            if status.is_success() {
                Ok(body)
            } else if status == reqwest::StatusCode::NOT_FOUND {
                Err(BackendError::NotFound("index".to_owned()))
            } else if status == reqwest::StatusCode::BAD_REQUEST {
                Err(BackendError::Validation(reason_of(&body)))
            } else {
                Err(BackendError::Status {
                    code: status.as_u16(),
                    detail: reason_of(&body),
                })
            }
        };

        let result = tokio::select! {
            () = ctx.cancel.cancelled() => Err(BackendError::Cancelled),
            result = tokio::time::timeout(self.timeout, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(BackendError::Timeout {
                    seconds: self.timeout.as_secs(),
                }),
            },
        };
        if let Err(e) = &result {
            tracing::debug!(error = %e, "elasticsearch request failed");
        }
        result
    }
}

/// Pull the first `reason` out of an ES error body, sanitized.
fn reason_of(body: &Value) -> String {
    body.pointer("/error/root_cause/0/reason")
        .or_else(|| body.pointer("/error/reason"))
        .and_then(Value::as_str)
        .unwrap_or("no detail")
        .chars()
        .take(200)
        .collect()
}

fn classify_reqwest(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout { seconds: 0 }
    } else if err.is_connect() {
        BackendError::Connection(err.to_string())
    } else {
        BackendError::Connection(format!("request failed: {err}"))
    }
}

fn decode_hits(body: &Value) -> Vec<EventDoc> {
    let Some(hits) = body.pointer("/hits/hits").and_then(Value::as_array) else {
        return Vec::new();
    };
    hits.iter()
        .map(|hit| {
            let sort = hit.get("sort").and_then(Value::as_array).and_then(|sort| {
                let timestamp_ms = sort.first().and_then(Value::as_i64)?;
                let id = sort.get(1).and_then(Value::as_str)?.to_owned();
                Some(SortKey { timestamp_ms, id })
            });
            EventDoc {
                id: hit
                    .get("_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                source: hit.get("_source").cloned().unwrap_or(Value::Null),
                sort,
            }
        })
        .collect()
}

#[async_trait]
impl EventStore for ElasticClient {
    async fn count(&self, ctx: &RequestCtx, query: &Value) -> BackendResult<u64> {
        let path = format!("/{}/_count", self.index_pattern);
        let body = self
            .execute(
                ctx,
                self.request(reqwest::Method::POST, &path)
                    .json(&json!({ "query": query })),
            )
            .await?;
        body.get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| BackendError::Decode("missing count".to_owned()))
    }

    async fn search(&self, ctx: &RequestCtx, request: SearchRequest) -> BackendResult<SearchResponse> {
        let mut body = json!({
            "query": request.query,
            "size": request.size,
            "sort": [
                { "@timestamp": { "order": "desc", "unmapped_type": "date" } },
                { "_id": { "order": "desc" } }
            ],
            "track_total_hits": true,
        });
        if let Some(obj) = body.as_object_mut() {
            if let Some(from) = request.from {
                obj.insert("from".to_owned(), Value::from(from));
            }
            if let Some(after) = &request.search_after {
                obj.insert(
                    "search_after".to_owned(),
                    json!([after.timestamp_ms, after.id]),
                );
            }
            if let Some(fields) = &request.fields {
                obj.insert("_source".to_owned(), json!(fields));
            }
        }

        let path = format!("/{}/_search", self.index_pattern);
        let response = self
            .execute(ctx, self.request(reqwest::Method::POST, &path).json(&body))
            .await?;

        Ok(SearchResponse {
            hits: decode_hits(&response),
            total: response
                .pointer("/hits/total/value")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            took_ms: response.get("took").and_then(Value::as_u64).unwrap_or(0),
            shards: u32::try_from(
                response
                    .pointer("/_shards/total")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
            )
            .unwrap_or(0),
            indices: self
                .index_pattern
                .split(',')
                .map(str::to_owned)
                .collect(),
        })
    }

    async fn aggregate(&self, ctx: &RequestCtx, query: &Value, aggs: &Value) -> BackendResult<Value> {
        let body = json!({
            "query": query,
            "size": 0,
            "aggs": aggs,
        });
        let path = format!("/{}/_search", self.index_pattern);
        let response = self
            .execute(ctx, self.request(reqwest::Method::POST, &path).json(&body))
            .await?;
        Ok(response.get("aggregations").cloned().unwrap_or(Value::Null))
    }

    async fn health(&self) -> HealthStatus {
        let ctx = RequestCtx::detached();
        let result = self
            .execute(&ctx, self.request(reqwest::Method::GET, "/_cluster/health"))
            .await;
        match result {
            Ok(body) => {
                let status = body
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                if status == "red" {
                    HealthStatus::unhealthy("cluster status red")
                } else {
                    HealthStatus::healthy(format!("cluster status {status}"))
                }
            },
            Err(e) => HealthStatus::unhealthy(e.to_string()),
        }
    }
}

impl std::fmt::Debug for ElasticClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticClient")
            .field("base_url", &self.base_url)
            .field("index_pattern", &self.index_pattern)
            .finish_non_exhaustive()
    }
}
