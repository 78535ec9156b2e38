//! End-to-end scenarios over a real TCP transport: authentication,
//! feature gating, streaming, and campaign analysis.

mod common;

use serde_json::json;

use common::{TestClient, TestServer};

#[tokio::test]
async fn test_s1_authenticate_then_call() {
    let harness = TestServer::start(100).await;
    let mut client = TestClient::connect(harness.addr).await;

    // A fresh connection authenticates and gets a session.
    let response = client.authenticate(&harness.api_key).await;
    let result = &response["result"];
    assert!(result["session_id"].is_string());
    assert_eq!(result["permissions"]["read_tools"], true);
    assert_eq!(result["permissions"]["admin"], false);

    // With the elasticsearch feature healthy, a query tool call succeeds.
    let response = client
        .call_tool("query_dshield_events", json!({ "page_size": 10 }))
        .await;
    assert!(response.get("error").is_none(), "unexpected: {response}");
    assert_eq!(response["result"]["returned"], 10);
    assert!(response["result"]["performance_metrics"]["query_time_ms"].is_u64());
}

#[tokio::test]
async fn test_unauthenticated_calls_rejected() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;

    // initialize is allowed pre-auth.
    let response = client.call("initialize", json!({})).await;
    assert_eq!(response["result"]["serverInfo"]["name"], "talon");

    // Everything else is not.
    for method in ["tools/list", "resources/list"] {
        let response = client.call(method, json!({})).await;
        assert_eq!(response["error"]["code"], -32001, "{method}");
    }
    let response = client.call_tool("get_health_status", json!({})).await;
    assert_eq!(response["error"]["code"], -32001);
}

#[tokio::test]
async fn test_invalid_key_and_expired_key() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;

    let response = client
        .authenticate("tk_analyst1.wrong-secret-wrong-secret-wrong-secret")
        .await;
    assert_eq!(response["error"]["code"], -32001);
    assert_eq!(response["error"]["data"]["kind"], "invalid");
}

#[tokio::test]
async fn test_s2_unhealthy_backend_hides_and_blocks_tools() {
    let harness = TestServer::start(10).await;
    harness
        .store
        .healthy
        .store(false, std::sync::atomic::Ordering::SeqCst);
    harness.reprobe().await;

    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    // tools/list omits the query tool...
    let response = client.call("tools/list", json!({})).await;
    let tools = response["result"]["tools"].as_array().unwrap();
    let names: Vec<&str> = tools.iter().filter_map(|t| t["name"].as_str()).collect();
    assert!(!names.contains(&"query_dshield_events"));
    // ...monitoring tools stay visible...
    assert!(names.contains(&"get_health_status"));

    // ...and a direct call is refused with the failing service named.
    let response = client.call_tool("query_dshield_events", json!({})).await;
    assert_eq!(response["error"]["code"], -32003);
    assert_eq!(response["error"]["data"]["service"], "elasticsearch");

    // Recovery un-hides the tool.
    harness
        .store
        .healthy
        .store(true, std::sync::atomic::Ordering::SeqCst);
    harness.reprobe().await;
    let response = client.call("tools/list", json!({})).await;
    let tools = response["result"]["tools"].as_array().unwrap();
    assert!(
        tools
            .iter()
            .any(|t| t["name"] == "query_dshield_events")
    );
}

#[tokio::test]
async fn test_s3_stream_with_resume_covers_all_events_once() {
    let harness = TestServer::start(1500).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    let first = client
        .call_tool(
            "stream_dshield_events_with_session_context",
            json!({ "chunk_size": 500, "max_chunks": 2 }),
        )
        .await;
    let result = &first["result"];
    let chunks = result["chunks"].as_array().unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|c| c["events"].as_array().unwrap().len() == 500));
    let cursor = result["final_cursor"]
        .as_str()
        .expect("cursor after two chunks")
        .to_owned();

    let second = client
        .call_tool(
            "stream_dshield_events_with_session_context",
            json!({ "chunk_size": 500, "max_chunks": 2, "cursor": cursor }),
        )
        .await;
    let result = &second["result"];
    assert!(result["final_cursor"].is_null());

    let mut ids: Vec<String> = Vec::new();
    for response in [&first, &second] {
        for chunk in response["result"]["chunks"].as_array().unwrap() {
            for event in chunk["events"].as_array().unwrap() {
                ids.push(event["_id"].as_str().unwrap().to_owned());
            }
        }
    }
    assert_eq!(ids.len(), 1500, "every event exactly once");
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), 1500, "no duplicates");
}

#[tokio::test]
async fn test_s4_campaign_analysis() {
    let harness = TestServer::start(50).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    let response = client
        .call_tool(
            "analyze_campaign",
            json!({
                "seed_indicators": ["141.98.80.121"],
                "time_range_hours": 168,
                "min_confidence": 0.5,
            }),
        )
        .await;
    let result = &response["result"];
    let campaign = &result["campaign"];
    assert!(campaign.is_object(), "expected a campaign: {response}");
    let confidence = campaign["confidence"].as_str().unwrap();
    assert!(matches!(confidence, "high" | "critical"), "{confidence}");

    let fired = result["correlation_methods_fired"].as_array().unwrap();
    assert!(fired.iter().any(|m| m == "ip_correlation"));
    assert!(fired.iter().any(|m| m == "temporal_correlation"));
    assert!(!result["timeline"].as_array().unwrap().is_empty());

    // Same inputs, same campaign id.
    let again = client
        .call_tool(
            "analyze_campaign",
            json!({
                "seed_indicators": ["141.98.80.121"],
                "time_range_hours": 168,
                "min_confidence": 0.5,
            }),
        )
        .await;
    assert_eq!(
        again["result"]["campaign"]["id"],
        response["result"]["campaign"]["id"]
    );
}

#[tokio::test]
async fn test_empty_seed_set_is_schema_rejection() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    let response = client
        .call_tool("analyze_campaign", json!({ "seed_indicators": [] }))
        .await;
    assert_eq!(response["error"]["code"], -32004);
}

#[tokio::test]
async fn test_unknown_field_suggests_canonical_name() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    let response = client
        .call_tool(
            "query_dshield_events",
            json!({ "filters": { "source.ip": "141.98.80.121" } }),
        )
        .await;
    assert_eq!(response["error"]["code"], -32004);
    assert_eq!(
        response["error"]["data"]["fields"][0]["suggestion"],
        "source_ip"
    );
}

#[tokio::test]
async fn test_resources_surface() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    let listing = client.call("resources/list", json!({})).await;
    let uris: Vec<&str> = listing["result"]["resources"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["uri"].as_str())
        .collect();
    assert!(uris.contains(&"talon://health"));
    assert!(uris.contains(&"talon://data-dictionary"));

    let read = client
        .call("resources/read", json!({ "uri": "talon://data-dictionary" }))
        .await;
    let text = read["result"]["contents"][0]["text"].as_str().unwrap();
    assert!(text.contains("source_ip"));

    let missing = client
        .call("resources/read", json!({ "uri": "talon://nope" }))
        .await;
    assert_eq!(missing["error"]["code"], -32001);
    assert_eq!(missing["error"]["data"]["kind"], "not_found");
}

#[tokio::test]
async fn test_monitoring_tools_answer() {
    let harness = TestServer::start(10).await;
    let mut client = TestClient::connect(harness.addr).await;
    client.authenticate(&harness.api_key).await;

    let health = client.call_tool("get_health_status", json!({})).await;
    assert_eq!(health["result"]["features"]["elasticsearch_queries"], true);

    let breakers = client.call_tool("get_circuit_breaker_status", json!({})).await;
    assert!(breakers["result"]["breakers"].is_array());

    // Trigger one error, then check it shows in analytics.
    client.call_tool("no_such_tool", json!({})).await;
    let analytics = client.call_tool("get_error_analytics", json!({})).await;
    assert!(analytics["result"]["by_code"]["METHOD_NOT_FOUND"].as_u64() >= Some(1));

    // The metrics snapshot is a pure value copy.
    let metrics = harness.server.metrics();
    assert!(metrics.requests_total >= 4);
    assert!(metrics.features["elasticsearch_queries"]);
}
