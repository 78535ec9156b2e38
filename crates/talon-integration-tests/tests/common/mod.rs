//! Shared fixtures: an in-memory event store with fault injection, a
//! scripted threat-intel stub, and a TCP test client.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use talon_auth::issue_key;
use talon_backends::{
    BackendError, BackendResult, EventDoc, EventStore, HealthStatus, Reputation,
    ReputationService, SearchRequest, SearchResponse, SortKey,
};
use talon_config::Config;
use talon_core::RequestCtx;
use talon_server::{Backends, Server};
use talon_transport::{TcpTransport, TransportLimits};

/// In-memory event store with controllable health and fault injection.
pub struct FixtureStore {
    events: Vec<EventDoc>,
    pub healthy: AtomicBool,
    pub failing: AtomicBool,
}

impl FixtureStore {
    /// `count` events, newest first, one session per event, all from the
    /// same attacking source.
    pub fn with_events(count: usize) -> Self {
        let base_ms = 1_750_000_000_000i64;
        let mut events: Vec<EventDoc> = (0..count)
            .map(|i| {
                let timestamp_ms = base_ms - (i as i64) * 1000;
                let id = format!("ev{i:06}");
                EventDoc {
                    id: id.clone(),
                    source: json!({
                        "@timestamp": chrono::DateTime::from_timestamp_millis(timestamp_ms)
                            .unwrap()
                            .to_rfc3339(),
                        "source": { "ip": "141.98.80.121" },
                        "event": { "type": "login_attempt" },
                        "user": { "name": "root" },
                        "session": { "id": format!("s{i}") },
                    }),
                    sort: Some(SortKey { timestamp_ms, id }),
                }
            })
            .collect();
        events.sort_by(|a, b| {
            let ka = a.sort.as_ref().unwrap();
            let kb = b.sort.as_ref().unwrap();
            kb.timestamp_ms
                .cmp(&ka.timestamp_ms)
                .then_with(|| kb.id.cmp(&ka.id))
        });
        Self {
            events,
            healthy: AtomicBool::new(true),
            failing: AtomicBool::new(false),
        }
    }

    fn check_fault(&self) -> BackendResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(BackendError::Connection("injected connection error".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl EventStore for FixtureStore {
    async fn count(&self, _ctx: &RequestCtx, _query: &Value) -> BackendResult<u64> {
        self.check_fault()?;
        Ok(self.events.len() as u64)
    }

    async fn search(
        &self,
        _ctx: &RequestCtx,
        request: SearchRequest,
    ) -> BackendResult<SearchResponse> {
        self.check_fault()?;
        let start = match &request.search_after {
            Some(after) => self
                .events
                .iter()
                .position(|e| {
                    let key = e.sort.as_ref().unwrap();
                    (key.timestamp_ms, &key.id) < (after.timestamp_ms, &after.id)
                })
                .unwrap_or(self.events.len()),
            None => request.from.unwrap_or(0),
        };
        let hits: Vec<EventDoc> = self
            .events
            .iter()
            .skip(start)
            .take(request.size)
            .cloned()
            .collect();
        Ok(SearchResponse {
            hits,
            total: self.events.len() as u64,
            took_ms: 1,
            shards: 1,
            indices: vec!["cowrie-*".to_owned()],
        })
    }

    async fn aggregate(
        &self,
        _ctx: &RequestCtx,
        _query: &Value,
        _aggs: &Value,
    ) -> BackendResult<Value> {
        self.check_fault()?;
        Ok(json!({}))
    }

    async fn health(&self) -> HealthStatus {
        if self.healthy.load(Ordering::SeqCst) {
            HealthStatus::healthy("fixture ok")
        } else {
            HealthStatus::unhealthy("fixture down")
        }
    }
}

/// Threat-intel stub answering every lookup with a fixed verdict.
pub struct FixtureIntel;

#[async_trait]
impl ReputationService for FixtureIntel {
    async fn reputation(&self, _ctx: &RequestCtx, ip: &str) -> BackendResult<Reputation> {
        Ok(Reputation {
            indicator: ip.to_owned(),
            score: 80,
            categories: vec!["scanner".to_owned()],
            last_seen: Some("2026-07-30T00:00:00Z".to_owned()),
        })
    }

    async fn batch_reputation(
        &self,
        ctx: &RequestCtx,
        ips: &[String],
    ) -> BackendResult<Vec<Reputation>> {
        let mut out = Vec::new();
        for ip in ips {
            out.push(self.reputation(ctx, ip).await?);
        }
        Ok(out)
    }

    async fn health(&self) -> HealthStatus {
        HealthStatus::healthy("stub")
    }
}

/// Test config: fast breaker recovery, no retries. `burst` controls the
/// key's token bucket (keep it roomy unless the test is about limits).
pub fn test_config(burst: u32) -> (Config, String) {
    let mut config = talon_config::load(None).expect("defaults load");
    config.error_handling.circuit_breaker.recovery_timeout = 1;
    config.error_handling.retry.max_attempts = 1;
    config.auth.defaults.rate_limit_per_minute = 60;
    config.auth.defaults.burst = burst;
    config.auth.connection_rate_limit_per_minute = 1000;
    config.auth.global_rate_limit_per_minute = 10_000;

    let (key, presented) = issue_key("analyst1", &config.auth.defaults);
    config.auth.keys.push(key);
    (config, presented)
}

/// A running server on an ephemeral TCP port.
pub struct TestServer {
    pub server: Arc<Server>,
    pub addr: std::net::SocketAddr,
    pub api_key: String,
    pub store: Arc<FixtureStore>,
}

impl TestServer {
    /// Start with a fixture of `event_count` events and a roomy burst.
    pub async fn start(event_count: usize) -> Self {
        Self::start_configured(event_count, |_| {}).await
    }

    /// Start with an explicit token-bucket burst (rate-limit tests).
    pub async fn start_with_burst(event_count: usize, burst: u32) -> Self {
        Self::start_configured(event_count, move |config| {
            config.auth.defaults.burst = burst;
        })
        .await
    }

    /// Start with arbitrary config tweaks applied before assembly.
    pub async fn start_configured<F>(event_count: usize, configure: F) -> Self
    where
        F: FnOnce(&mut Config),
    {
        let (mut config, api_key) = test_config(100);
        configure(&mut config);
        let store = Arc::new(FixtureStore::with_events(event_count));
        let backends = Backends {
            store: Arc::clone(&store) as Arc<dyn EventStore>,
            intel: Some(Arc::new(FixtureIntel)),
            report: None,
        };
        let server = Server::new(config.clone(), backends).expect("server assembly");
        server.features().run_probes_once().await;

        let limits = TransportLimits {
            max_frame_bytes: config.transport.max_frame_bytes,
            max_in_flight: config.transport.max_in_flight_per_connection,
            idle_timeout_seconds: config.transport.idle_timeout_seconds,
        };
        let (transport, events) = TcpTransport::new("127.0.0.1", 0, 16, limits);
        let addr = transport.start().await.expect("bind");
        let handle = transport.handle();
        tokio::spawn(Arc::clone(&server).serve(handle, events));

        Self {
            server,
            addr,
            api_key,
            store,
        }
    }

    /// Re-run health probes (after flipping fixture health).
    pub async fn reprobe(&self) {
        self.server.features().run_probes_once().await;
    }
}

/// Minimal JSON-RPC client over length-prefixed TCP frames.
pub struct TestClient {
    stream: TcpStream,
    next_id: i64,
}

impl TestClient {
    pub async fn connect(addr: std::net::SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect");
        Self { stream, next_id: 1 }
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub async fn send_raw(&mut self, payload: &[u8]) {
        let len = u32::try_from(payload.len()).unwrap();
        self.stream.write_all(&len.to_be_bytes()).await.expect("write len");
        self.stream.write_all(payload).await.expect("write payload");
    }

    pub async fn read_frame(&mut self) -> Option<Value> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await.ok()?;
        let len = u32::from_be_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.ok()?;
        serde_json::from_slice(&payload).ok()
    }

    /// Send a request and await its response.
    pub async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.next_id;
        self.next_id += 1;
        let frame = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        self.send_raw(&serde_json::to_vec(&frame).unwrap()).await;
        let response = self.read_frame().await.expect("response frame");
        assert_eq!(response["id"], id, "response id must match request id");
        response
    }

    pub async fn authenticate(&mut self, api_key: &str) -> Value {
        self.call("authenticate", json!({ "api_key": api_key })).await
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Value {
        self.call("tools/call", json!({ "name": name, "arguments": arguments }))
            .await
    }
}
