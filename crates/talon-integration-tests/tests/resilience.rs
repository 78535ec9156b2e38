//! Resilience scenarios: circuit breaker lifecycle, rate limiting, and
//! frame-size enforcement.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use common::{TestClient, TestServer};

#[tokio::test]
async fn test_s5_circuit_breaker_lifecycle() {
    let harness = TestServer::start(100).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    // Five consecutive connection errors trip the breaker
    // (failure_threshold = 5).
    harness.store.failing.store(true, Ordering::SeqCst);
    for i in 0..5 {
        let response = client.call_tool("query_dshield_events", json!({})).await;
        assert_eq!(response["error"]["code"], -32000, "call {i}: {response}");
    }

    // The sixth call fails fast without touching the backend.
    let response = client.call_tool("query_dshield_events", json!({})).await;
    assert_eq!(response["error"]["code"], -32007);
    assert_eq!(response["error"]["data"]["service"], "elasticsearch");
    assert!(response["error"]["data"]["retry_after_seconds"].as_u64() >= Some(1));

    let status = client.call_tool("get_circuit_breaker_status", json!({})).await;
    let breakers = status["result"]["breakers"].as_array().unwrap();
    let es = breakers
        .iter()
        .find(|b| b["service"] == "elasticsearch")
        .unwrap();
    assert_eq!(es["state"], "open");

    // After the recovery window (1s in the test config) the next call is
    // admitted; with the fault cleared, success_threshold = 2 successes
    // close the breaker again.
    harness.store.failing.store(false, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let response = client.call_tool("query_dshield_events", json!({})).await;
    assert!(response.get("error").is_none(), "probe call: {response}");

    let status = client.call_tool("get_circuit_breaker_status", json!({})).await;
    let breakers = status["result"]["breakers"].as_array().unwrap();
    let es = breakers
        .iter()
        .find(|b| b["service"] == "elasticsearch")
        .unwrap();
    // One query makes two guarded backend calls (count + search), which
    // meets the success threshold.
    assert_eq!(es["state"], "closed");
}

#[tokio::test]
async fn test_s6_rate_limit_burst_and_recovery() {
    let harness = TestServer::start_with_burst(10, 3).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    // rate = 60/min, burst = 3: the fourth immediate call is rejected.
    for i in 0..3 {
        let response = client.call_tool("get_health_status", json!({})).await;
        assert!(response.get("error").is_none(), "call {i}: {response}");
    }
    let response = client.call_tool("get_health_status", json!({})).await;
    assert_eq!(response["error"]["code"], -32006);
    assert!(response["error"]["data"]["retry_after_seconds"].as_u64() >= Some(1));

    // One token refills after a second.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = client.call_tool("get_health_status", json!({})).await;
    assert!(response.get("error").is_none(), "{response}");
}

#[tokio::test]
async fn test_authenticate_brute_force_is_throttled() {
    // The connection window gates authenticate itself, so key guessing
    // cannot run unthrottled against the hash compare.
    let harness = TestServer::start_configured(10, |config| {
        config.auth.connection_rate_limit_per_minute = 5;
    })
    .await;
    let mut client = TestClient::connect(harness.addr).await;

    let bad_key = "tk_analyst1.guess-guess-guess-guess-guess-guess";
    for attempt in 0..5 {
        let response = client.authenticate(bad_key).await;
        assert_eq!(response["error"]["code"], -32001, "attempt {attempt}");
    }
    let response = client.authenticate(bad_key).await;
    assert_eq!(response["error"]["code"], -32006);
    assert_eq!(response["error"]["data"]["scope"], "connection");
    assert!(response["error"]["data"]["retry_after_seconds"].as_u64() >= Some(1));

    // The real key is throttled too until the window drains.
    let response = client.authenticate(&harness.api_key).await;
    assert_eq!(response["error"]["code"], -32006);
}

#[tokio::test]
async fn test_oversized_frame_closes_connection() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;

    // Declare a frame over the 1 MiB cap; the server must close without
    // reading it.
    let declared = u32::try_from(2 * 1024 * 1024).unwrap();
    tokio::io::AsyncWriteExt::write_all(client.stream_mut(), &declared.to_be_bytes())
        .await
        .unwrap();

    assert!(client.read_frame().await.is_none(), "connection must close");
}

#[tokio::test]
async fn test_malformed_json_with_id_gets_parse_error() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;

    client
        .send_raw(br#"{"jsonrpc":"2.0","id":9,"method":"x","params":{"broken"#)
        .await;
    let response = client.read_frame().await.expect("parse error response");
    assert_eq!(response["id"], 9);
    assert_eq!(response["error"]["code"], -32700);
}

#[tokio::test]
async fn test_not_jsonrpc_is_invalid_request() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;

    client.send_raw(br#"{"jsonrpc":"1.9","id":1,"method":"x"}"#).await;
    let response = client.read_frame().await.expect("invalid request response");
    assert_eq!(response["error"]["code"], -32600);
}

#[tokio::test]
async fn test_revoked_key_cannot_reauthenticate() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;
    let response = client.authenticate(&harness.api_key).await;
    assert!(response["result"]["session_id"].is_string());

    harness
        .server
        .revoke_key(&talon_core::KeyId::new("analyst1"));

    // The session is gone and the key no longer authenticates.
    let response = client.call_tool("get_health_status", json!({})).await;
    assert_eq!(response["error"]["code"], -32001);
    let response = client.authenticate(&harness.api_key).await;
    assert_eq!(response["error"]["code"], -32001);
}
