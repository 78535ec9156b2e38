//! The server facade: assembly, request routing, lifecycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use talon_auth::{Authenticator, Session};
use talon_backends::{
    ElasticClient, EventStore, HealthStatus, ReportRenderer, ReputationService, ThreatIntelClient,
    TypesetRenderer,
};
use talon_breaker::{BreakerRegistry, BreakerSettings};
use talon_campaign::{
    AnalyzeCampaignTool, CampaignTimelineTool, Correlator, DetectAnomaliesTool, DetectOngoingTool,
    ExpandIndicatorsTool,
};
use talon_config::Config;
use talon_core::{
    ConnectionId, ErrorAnalytics, RequestCtx, RetryConfig, ServerError, ServerResult,
};
use talon_health::{FeatureManager, HealthProbe};
use talon_query::{QueryEngine, QueryEventsTool, StreamEventsTool};
use talon_ratelimit::{Decision, KeyLimits, RateLimiter, RateLimiterSettings};
use talon_tools::{Dispatcher, ToolRegistry};
use talon_transport::{TransportEvent, TransportHandle};

use crate::metrics::{Metrics, MetricsState};
use crate::monitoring::{
    BreakerStatusTool, DataDictionaryTool, ErrorAnalyticsTool, GenerateReportTool,
    HealthStatusTool,
};
use crate::rpc::{ParsedFrame, RpcRequest, RpcResponse, parse_frame};

/// The protocol version reported by `initialize`.
const PROTOCOL_VERSION: &str = "2025-06-18";

/// The backend adapters, behind their trait seams so tests can inject
/// fixtures.
pub struct Backends {
    /// The event store (Elasticsearch in production).
    pub store: Arc<dyn EventStore>,
    /// The threat-intel vendor, when wired.
    pub intel: Option<Arc<dyn ReputationService>>,
    /// The report renderer, when wired.
    pub report: Option<Arc<dyn ReportRenderer>>,
}

impl Backends {
    /// Build the production adapters from config.
    ///
    /// # Errors
    ///
    /// Returns an error when an HTTP client cannot be constructed.
    pub fn production(config: &Config) -> ServerResult<Self> {
        let store = ElasticClient::new(
            &config.elasticsearch,
            config.error_handling.timeouts.backend_seconds,
        )
        .map_err(|e| ServerError::Internal(format!("elasticsearch client: {e}")))?;
        let intel = ThreatIntelClient::new(&config.threat_intel)
            .map_err(|e| ServerError::Internal(format!("threat intel client: {e}")))?;
        let report = TypesetRenderer::new(&config.report, config.output_directory.clone());
        Ok(Self {
            store: Arc::new(store),
            intel: Some(Arc::new(intel)),
            report: Some(Arc::new(report)),
        })
    }
}

struct StoreProbe(Arc<dyn EventStore>);

#[async_trait]
impl HealthProbe for StoreProbe {
    fn name(&self) -> &str {
        "elasticsearch"
    }
    async fn probe(&self) -> HealthStatus {
        self.0.health().await
    }
}

struct IntelProbe(Arc<dyn ReputationService>);

#[async_trait]
impl HealthProbe for IntelProbe {
    fn name(&self) -> &str {
        "threat_intel"
    }
    async fn probe(&self) -> HealthStatus {
        self.0.health().await
    }
}

struct RendererProbe(Arc<dyn ReportRenderer>);

#[async_trait]
impl HealthProbe for RendererProbe {
    fn name(&self) -> &str {
        "report_renderer"
    }
    async fn probe(&self) -> HealthStatus {
        self.0.health().await
    }
}

/// The assembled server.
pub struct Server {
    config: Config,
    authenticator: Arc<Authenticator>,
    limiter: Arc<RateLimiter>,
    breakers: Arc<BreakerRegistry>,
    features: Arc<FeatureManager>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<QueryEngine>,
    analytics: Arc<ErrorAnalytics>,
    metrics: Arc<MetricsState>,
    conn_tokens: DashMap<ConnectionId, CancellationToken>,
    draining: AtomicBool,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Server {
    /// Assemble every component in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed key records or tool schemas — both
    /// startup bugs, never runtime conditions.
    pub fn new(config: Config, backends: Backends) -> ServerResult<Arc<Self>> {
        let analytics = Arc::new(ErrorAnalytics::new(
            config.error_handling.error_aggregation.history_size,
            config.error_handling.error_aggregation.window_seconds,
        ));

        let breaker_config = &config.error_handling.circuit_breaker;
        let breakers = Arc::new(BreakerRegistry::new(BreakerSettings {
            failure_threshold: breaker_config.failure_threshold,
            recovery_timeout: Duration::from_secs(breaker_config.recovery_timeout),
            success_threshold: breaker_config.success_threshold,
        }));

        let authenticator = Arc::new(Authenticator::from_config(&config.auth)?);

        let limiter = Arc::new(RateLimiter::new(RateLimiterSettings {
            global_per_minute: config.auth.global_rate_limit_per_minute,
            connection_per_minute: config.auth.connection_rate_limit_per_minute,
        }));

        let mut features = FeatureManager::new(&config.health);
        features.add_probe(Arc::new(StoreProbe(Arc::clone(&backends.store))));
        if let Some(intel) = &backends.intel {
            features.add_probe(Arc::new(IntelProbe(Arc::clone(intel))));
        }
        if let Some(report) = &backends.report {
            features.add_probe(Arc::new(RendererProbe(Arc::clone(report))));
        }
        let features = Arc::new(features);

        let retry_config = RetryConfig {
            max_attempts: config.error_handling.retry.max_attempts,
            initial_delay: Duration::from_millis(config.error_handling.retry.initial_delay_ms),
            max_delay: Duration::from_secs(config.error_handling.retry.max_delay_seconds),
        };
        let engine = Arc::new(QueryEngine::new(
            Arc::clone(&backends.store),
            breakers.get("elasticsearch"),
            config.query.clone(),
            config.streaming.clone(),
            retry_config,
        ));
        let correlator = Arc::new(Correlator::new(
            Arc::clone(&engine),
            backends.intel.clone(),
        ));

        let metrics = Arc::new(MetricsState::new());
        let registry = build_registry(
            &config,
            &engine,
            &correlator,
            &features,
            &breakers,
            &analytics,
            &metrics,
            backends.report.as_ref(),
        )?;
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(registry), Arc::clone(&features)));

        Ok(Arc::new(Self {
            config,
            authenticator,
            limiter,
            breakers,
            features,
            dispatcher,
            engine,
            analytics,
            metrics,
            conn_tokens: DashMap::new(),
            draining: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }))
    }

    /// The feature manager (probe loop and tests drive it).
    #[must_use]
    pub fn features(&self) -> Arc<FeatureManager> {
        Arc::clone(&self.features)
    }

    /// The error aggregator.
    #[must_use]
    pub fn analytics(&self) -> Arc<ErrorAnalytics> {
        Arc::clone(&self.analytics)
    }

    /// Token cancelled when the server shuts down.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Revoke an api key: destroys its sessions (cancelling in-flight
    /// requests) and drops its rate-limiter state.
    pub fn revoke_key(&self, key: &talon_core::KeyId) {
        self.authenticator.revoke(key);
        self.limiter.forget_key(key);
    }

    /// A read-only metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> Metrics {
        let features: BTreeMap<String, bool> =
            self.features.snapshot().features.into_iter().collect();
        Metrics::snapshot(&self.metrics, self.breakers.snapshot(), features)
    }

    /// Process transport events until the transport ends or shutdown.
    pub async fn serve(
        self: Arc<Self>,
        handle: TransportHandle,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        // Idle sessions expire on the transport's idle cadence.
        let idle_seconds = self.config.transport.idle_timeout_seconds.max(1);
        let expiry_auth = Arc::clone(&self.authenticator);
        let expiry_shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(idle_seconds.min(60)));
            loop {
                tokio::select! {
                    () = expiry_shutdown.cancelled() => break,
                    _ = interval.tick() => {
                        let expired = expiry_auth.sessions().expire_idle(idle_seconds);
                        if expired > 0 {
                            tracing::info!(expired, "idle sessions expired");
                        }
                    },
                }
            }
        });

        loop {
            let Some(event) = events.recv().await else {
                break;
            };
            match event {
                TransportEvent::Connected { connection, peer } => {
                    self.conn_tokens
                        .insert(connection, self.shutdown.child_token());
                    tracing::info!(%connection, %peer, "connection established");
                },
                TransportEvent::Disconnected { connection } => {
                    if let Some((_, token)) = self.conn_tokens.remove(&connection) {
                        token.cancel();
                    }
                    self.authenticator.sessions().remove_connection(connection);
                    self.limiter.forget_connection(connection);
                    tracing::info!(%connection, "connection closed");
                },
                TransportEvent::Frame {
                    connection,
                    payload,
                    permit,
                } => {
                    if self.draining.load(Ordering::SeqCst) {
                        drop(permit);
                        continue;
                    }
                    let server = Arc::clone(&self);
                    let handle = handle.clone();
                    self.tracker.spawn(async move {
                        server.handle_frame(&handle, connection, &payload).await;
                        drop(permit);
                    });
                },
            }
        }
    }

    /// Graceful shutdown: stop accepts, stop new requests, drain, cancel
    /// leftovers, close the transport.
    pub async fn graceful_shutdown(&self, handle: &TransportHandle) {
        let deadline = Duration::from_secs(self.config.server.shutdown_deadline_seconds);
        tracing::info!(deadline_seconds = deadline.as_secs(), "shutdown initiated");

        // 1. No new connections.
        handle.shutdown_token().cancel();
        // 2. No new requests on existing connections.
        self.draining.store(true, Ordering::SeqCst);
        // 3. Drain in-flight requests up to the deadline.
        self.tracker.close();
        if tokio::time::timeout(deadline, self.tracker.wait()).await.is_err() {
            tracing::warn!("drain deadline exceeded, cancelling in-flight requests");
            // 4. Cancel whatever is left.
            self.shutdown.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), self.tracker.wait()).await;
        }
        self.shutdown.cancel();
        // 5. Close the transport (6. adapters close with their drop).
        handle.shutdown();
        tracing::info!("shutdown complete");
    }

    /// Handle one inbound frame end to end.
    async fn handle_frame(&self, handle: &TransportHandle, connection: ConnectionId, payload: &[u8]) {
        let conn_token = self
            .conn_tokens
            .get(&connection)
            .map_or_else(CancellationToken::new, |entry| entry.value().clone());

        let request = match parse_frame(payload) {
            ParsedFrame::Fatal => {
                tracing::warn!(%connection, "unparseable frame without id, closing connection");
                self.analytics.record(
                    talon_core::ErrorCode::ParseError,
                    None,
                    talon_core::CorrelationId::new(),
                );
                handle.close(connection);
                return;
            },
            ParsedFrame::Unparseable { id } => {
                let err = ServerError::Parse("malformed JSON frame".to_owned());
                self.analytics
                    .record(err.code(), None, talon_core::CorrelationId::new());
                self.send(handle, connection, &RpcResponse::error(id, &err)).await;
                return;
            },
            ParsedFrame::Invalid { id, reason } => {
                let err = ServerError::InvalidRequest(reason);
                self.analytics
                    .record(err.code(), None, talon_core::CorrelationId::new());
                self.send(handle, connection, &RpcResponse::error(id, &err)).await;
                return;
            },
            ParsedFrame::Notification(request) => {
                tracing::debug!(%connection, method = %request.method, "notification ignored");
                return;
            },
            ParsedFrame::Request(request) => request,
        };

        let id = request.id.clone().unwrap_or(Value::Null);
        let ctx = match self.authenticator.sessions().get_by_connection(connection) {
            Some(session) => RequestCtx::new(session.id, conn_token.child_token()),
            None => RequestCtx::unauthenticated(conn_token.child_token()),
        };
        let started = Instant::now();
        let method = request.method.clone();
        let tool_name = tool_name_of(&request);

        let result = self.route(connection, &ctx, request).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match &result {
            Ok(_) => {
                tracing::info!(
                    correlation = %ctx.correlation_id,
                    %connection,
                    method = %method,
                    tool = tool_name.as_deref().unwrap_or("-"),
                    elapsed_ms,
                    outcome = "ok",
                    "request complete"
                );
            },
            Err(err) => {
                self.analytics
                    .record(err.code(), tool_name.as_deref(), ctx.correlation_id);
                tracing::warn!(
                    correlation = %ctx.correlation_id,
                    %connection,
                    method = %method,
                    tool = tool_name.as_deref().unwrap_or("-"),
                    elapsed_ms,
                    code = %err.code(),
                    outcome = "error",
                    "request failed"
                );
            },
        }
        self.metrics
            .record_request(tool_name.as_deref(), elapsed_ms, result.is_err());

        // A request cancelled by connection close emits nothing — the peer
        // is gone. Timeouts still answer (they arrive as Ok-shaped errors
        // from the dispatcher, not via this token).
        if conn_token.is_cancelled() {
            return;
        }
        let response = match result {
            Ok(value) => RpcResponse::result(id, value),
            Err(err) => RpcResponse::error(id, &err),
        };
        self.send(handle, connection, &response).await;
    }

    async fn send(&self, handle: &TransportHandle, connection: ConnectionId, response: &RpcResponse) {
        if let Err(e) = handle.send(connection, response.to_bytes()).await {
            tracing::debug!(%connection, error = %e, "response send failed");
        }
    }

    /// Route one request to its method handler.
    async fn route(
        &self,
        connection: ConnectionId,
        ctx: &RequestCtx,
        request: RpcRequest,
    ) -> ServerResult<Value> {
        let session = self.authenticator.sessions().get_by_connection(connection);
        match request.method.as_str() {
            "initialize" => Ok(self.initialize_result()),
            "authenticate" => self.authenticate(connection, &request.params),
            "tools/list" => {
                let session = require_session(session.as_ref())?;
                let visible = self
                    .dispatcher
                    .registry()
                    .visible(&self.features, session.permissions);
                Ok(json!({ "tools": visible }))
            },
            "tools/call" => {
                let session = require_session(session.as_ref())?;
                self.call_tool(ctx, session, &request.params).await
            },
            "resources/list" => {
                require_session(session.as_ref())?;
                Ok(resources_list())
            },
            "resources/read" => {
                let session = require_session(session.as_ref())?;
                self.read_resource(session, &request.params)
            },
            other => Err(ServerError::MethodNotFound {
                method: other.to_owned(),
            }),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "talon",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {},
                "resources": {},
            },
            "authentication": { "method": "authenticate", "scheme": "api_key" },
        })
    }

    fn authenticate(&self, connection: ConnectionId, params: &Value) -> ServerResult<Value> {
        // Pre-auth requests have no key to charge, but the connection and
        // global windows still gate them — this is what throttles api-key
        // brute-forcing, and it runs before the hash compare.
        if let Decision::Rejected {
            scope,
            retry_after_seconds,
        } = self.limiter.allow_unkeyed(connection)
        {
            return Err(ServerError::RateLimited {
                scope,
                retry_after_seconds,
            });
        }

        let api_key = params
            .get("api_key")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::validation("api_key", "required string"))?;
        let session = self.authenticator.authenticate(api_key, connection)?;
        let expires_at = self
            .authenticator
            .key_expiry(&session.key_id)
            .map(|dt| dt.to_rfc3339());
        Ok(json!({
            "session_id": session.id,
            "permissions": session.permissions,
            "expires_at": expires_at,
        }))
    }

    async fn call_tool(
        &self,
        ctx: &RequestCtx,
        session: Session,
        params: &Value,
    ) -> ServerResult<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::validation("name", "required string"))?;
        let args = params
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let decision = self.limiter.allow(
            &session.key_id,
            KeyLimits {
                rate_per_minute: session.rate_limit_per_minute,
                burst: session.burst,
            },
            session.connection_id,
        );
        if let Decision::Rejected {
            scope,
            retry_after_seconds,
        } = decision
        {
            return Err(ServerError::RateLimited {
                scope,
                retry_after_seconds,
            });
        }

        // Session revocation terminates the call with AUTH_REVOKED even
        // while the handler is mid-flight.
        let result = tokio::select! {
            () = session.cancel.cancelled() => Err(ServerError::AuthRevoked),
            result = self
                .dispatcher
                .dispatch(ctx, session.permissions, name, args) => result,
        };
        if result.is_ok() {
            self.authenticator.track_usage(session.id);
        }
        result
    }

    fn read_resource(&self, session: Session, params: &Value) -> ServerResult<Value> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .ok_or_else(|| ServerError::validation("uri", "required string"))?;
        let body = match uri {
            "talon://health" => serde_json::to_value(self.features.snapshot())
                .map_err(|e| ServerError::Internal(e.to_string()))?,
            "talon://capabilities" => {
                let visible = self
                    .dispatcher
                    .registry()
                    .visible(&self.features, session.permissions);
                json!({ "tools": visible })
            },
            "talon://data-dictionary" => self.engine.data_dictionary(),
            other => {
                return Err(ServerError::ResourceNotFound {
                    resource: other.to_owned(),
                });
            },
        };
        Ok(json!({
            "contents": [{
                "uri": uri,
                "mimeType": "application/json",
                "text": body.to_string(),
            }]
        }))
    }
}

fn require_session(session: Option<&Session>) -> ServerResult<Session> {
    session
        .cloned()
        .ok_or(ServerError::AuthRequired { kind: "missing" })
}

fn tool_name_of(request: &RpcRequest) -> Option<String> {
    (request.method == "tools/call")
        .then(|| {
            request
                .params
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .flatten()
}

fn resources_list() -> Value {
    json!({
        "resources": [
            {
                "uri": "talon://health",
                "name": "Backend health and feature availability",
                "mimeType": "application/json",
            },
            {
                "uri": "talon://capabilities",
                "name": "Visible tools for this session",
                "mimeType": "application/json",
            },
            {
                "uri": "talon://data-dictionary",
                "name": "Queryable field catalog",
                "mimeType": "application/json",
            },
        ]
    })
}

/// Register every tool. The explicit table, built once at startup.
#[allow(clippy::too_many_arguments)]
fn build_registry(
    config: &Config,
    engine: &Arc<QueryEngine>,
    correlator: &Arc<Correlator>,
    features: &Arc<FeatureManager>,
    breakers: &Arc<BreakerRegistry>,
    analytics: &Arc<ErrorAnalytics>,
    metrics: &Arc<MetricsState>,
    report: Option<&Arc<dyn ReportRenderer>>,
) -> ServerResult<ToolRegistry> {
    let tool_timeout = config.error_handling.timeouts.tool_default_seconds;
    let mut registry = ToolRegistry::new();

    registry.register(
        QueryEventsTool::definition(tool_timeout),
        Arc::new(QueryEventsTool(Arc::clone(engine))),
    )?;
    registry.register(
        StreamEventsTool::definition(tool_timeout),
        Arc::new(StreamEventsTool(Arc::clone(engine))),
    )?;

    registry.register(
        AnalyzeCampaignTool::definition(),
        Arc::new(AnalyzeCampaignTool(Arc::clone(correlator))),
    )?;
    registry.register(
        ExpandIndicatorsTool::definition(),
        Arc::new(ExpandIndicatorsTool(Arc::clone(correlator))),
    )?;
    registry.register(
        CampaignTimelineTool::definition(),
        Arc::new(CampaignTimelineTool(Arc::clone(correlator))),
    )?;
    registry.register(
        DetectOngoingTool::definition(),
        Arc::new(DetectOngoingTool(Arc::clone(correlator))),
    )?;
    registry.register(
        DetectAnomaliesTool::definition(),
        Arc::new(DetectAnomaliesTool(Arc::clone(engine))),
    )?;

    registry.register(
        HealthStatusTool::definition(),
        Arc::new(HealthStatusTool {
            features: Arc::clone(features),
            metrics: Arc::clone(metrics),
        }),
    )?;
    registry.register(
        ErrorAnalyticsTool::definition(),
        Arc::new(ErrorAnalyticsTool(Arc::clone(analytics))),
    )?;
    registry.register(
        BreakerStatusTool::definition(),
        Arc::new(BreakerStatusTool(Arc::clone(breakers))),
    )?;
    registry.register(
        DataDictionaryTool::definition(),
        Arc::new(DataDictionaryTool(Arc::clone(engine))),
    )?;

    if let Some(report) = report {
        registry.register(
            GenerateReportTool::definition(),
            Arc::new(GenerateReportTool {
                renderer: Arc::clone(report),
                output_directory: config.output_directory.clone().into(),
            }),
        )?;
    }

    tracing::info!(tools = registry.len(), "tool registry built");
    Ok(registry)
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("connections", &self.conn_tokens.len())
            .finish_non_exhaustive()
    }
}
