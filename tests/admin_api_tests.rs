//! # Gateway and Admin API Tests
//!
//! Drives the full router (gateway routes plus `/admin`) through `axum-test`:
//! - Worker registration and heartbeats
//! - Dispatch to a mock worker with correlation and worker headers
//! - Admin worker management, strategy switching and circuit breakers
//! - Health and metrics endpoints

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use dispatch_gateway::dispatch::{HttpForwarder, HttpForwarderConfig};
use dispatch_gateway::observability::{build_prometheus_recorder, MetricsConfig};
use dispatch_gateway::{GatewayConfig, GatewayServer, InMemoryWorkerRegistry};

fn gateway() -> GatewayServer {
    let mut config = GatewayConfig::default();
    config.circuit_breaker.failure_threshold = 2;
    GatewayServer::from_parts(
        config,
        Arc::new(InMemoryWorkerRegistry::new()),
        Arc::new(HttpForwarder::new(&HttpForwarderConfig::default()).unwrap()),
    )
}

fn test_server(gateway: &GatewayServer) -> TestServer {
    TestServer::new(gateway.router()).expect("Failed to create test server")
}

async fn register(server: &TestServer, name: &str, port: u16, service_type: &str) -> String {
    let response = server
        .post("/api/workers/register")
        .json(&json!({
            "name": name,
            "host": "127.0.0.1",
            "port": port,
            "serviceType": service_type,
            "weight": 1
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);

    let body: Value = response.json();
    body["workerId"].as_str().unwrap().to_string()
}

/// Registration returns an id and the heartbeat interval; bad input is rejected
#[tokio::test]
async fn test_register_worker() {
    let gateway = gateway();
    let server = test_server(&gateway);

    let response = server
        .post("/api/workers/register")
        .json(&json!({
            "name": "renderer-1",
            "host": "10.0.0.7",
            "port": 9000,
            "serviceType": "render"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::CREATED);
    let body: Value = response.json();
    assert!(!body["workerId"].as_str().unwrap().is_empty());
    assert_eq!(body["heartbeatIntervalMs"], 30_000);

    let response = server
        .post("/api/workers/register")
        .json(&json!({
            "name": "transcoder",
            "host": "10.0.0.8",
            "port": 9000,
            "serviceType": "transcode"
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "invalid_input");

    let response = server
        .post("/api/workers/register")
        .json(&json!({ "name": "no-port", "host": "10.0.0.9", "serviceType": "parse" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

/// Heartbeats update status and load; unknown ids are 404
#[tokio::test]
async fn test_heartbeat() {
    let gateway = gateway();
    let server = test_server(&gateway);
    let id = register(&server, "parser", 9100, "parse").await;

    let response = server
        .post("/api/workers/heartbeat")
        .json(&json!({
            "workerId": id,
            "status": "busy",
            "currentConnections": 3,
            "cpuUsage": 72.5
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "busy");
    assert_eq!(body["currentConnections"], 3);
    assert_eq!(body["cpuUsage"], 72.5);

    let response = server
        .post("/api/workers/heartbeat")
        .json(&json!({ "workerId": "does-not-exist" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let response = server
        .post("/api/workers/heartbeat")
        .json(&json!({ "workerId": "" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

/// The worker's response is relayed with worker and correlation headers
#[tokio::test]
async fn test_dispatch_relays_worker_response() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/render"))
        .and(header("x-request-id", "trace-7"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string("{\"image\":\"ok\"}"),
        )
        .mount(&worker)
        .await;

    let gateway = gateway();
    let server = test_server(&gateway);
    let id = register(&server, "renderer", worker.address().port(), "render").await;

    let response = server
        .post("/api/dispatch/render")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static("trace-7"),
        )
        .json(&json!({ "document": "<p>hi</p>" }))
        .await;

    assert_eq!(response.status_code(), StatusCode::OK);
    assert_eq!(response.header("x-worker-id"), id.as_str());
    assert_eq!(response.header("x-request-id"), "trace-7");
    let body: Value = response.json();
    assert_eq!(body["image"], "ok");

    let record: Value = server.get(&format!("/admin/workers/{}", id)).await.json();
    assert_eq!(record["totalRequests"], 1);
    assert_eq!(record["currentConnections"], 0);
}

/// Dispatch errors carry the error body and still echo a correlation id
#[tokio::test]
async fn test_dispatch_errors() {
    let gateway = gateway();
    let server = test_server(&gateway);

    let response = server.post("/api/dispatch/parse").json(&json!({ "text": "x" })).await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "no_available_worker");
    assert_eq!(body["error"]["retryable"], true);
    assert!(!response.header("x-request-id").is_empty());

    let response = server.post("/api/dispatch/unknown").json(&json!({ "text": "x" })).await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    register(&server, "parser", 9200, "parse").await;
    let response = server.post("/api/dispatch/parse").text("").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
}

/// Failing workers end up with open breakers visible through the admin API
#[tokio::test]
async fn test_circuit_breaker_admin() {
    let worker = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&worker)
        .await;

    let gateway = gateway();
    let server = test_server(&gateway);
    let id = register(&server, "combo", worker.address().port(), "combo").await;

    for _ in 0..2 {
        let response = server.post("/api/dispatch/combo").json(&json!({ "job": 1 })).await;
        assert_eq!(response.status_code(), StatusCode::BAD_GATEWAY);
    }

    let response = server.post("/api/dispatch/combo").json(&json!({ "job": 1 })).await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json();
    assert_eq!(body["error"]["type"], "all_workers_circuit_open");

    let body: Value = server.get("/admin/circuit-breakers").await.json();
    assert_eq!(body["config"]["failure_threshold"], 2);
    assert_eq!(body["breakers"][0]["worker_id"], id.as_str());
    assert_eq!(body["breakers"][0]["open"], true);

    let stats: Value = server.get(&format!("/admin/workers/{}/stats", id)).await.json();
    assert_eq!(stats["failed_requests"], 2);
    assert_eq!(stats["success_rate"], 0.0);
    assert_eq!(stats["circuit_breaker"]["failure_count"], 2);

    let body: Value = server
        .post(&format!("/admin/circuit-breakers/{}/reset", id))
        .await
        .json();
    assert_eq!(body["reset"], true);
    assert!(!gateway.balancer().breaker().is_open(&id));

    let body: Value = server
        .post(&format!("/admin/circuit-breakers/{}/reset", id))
        .await
        .json();
    assert_eq!(body["reset"], false);
}

/// Listing, filtering, offlining and deleting workers
#[tokio::test]
async fn test_worker_admin() {
    let gateway = gateway();
    let server = test_server(&gateway);
    let render = register(&server, "renderer", 9300, "render").await;
    let parse = register(&server, "parser", 9301, "parse").await;

    let body: Value = server.get("/admin/workers").await.json();
    assert_eq!(body["total"], 2);
    assert_eq!(body["workers"][0]["id"], render.as_str());

    let body: Value = server.get("/admin/workers?service_type=parse").await.json();
    assert_eq!(body["total"], 1);
    assert_eq!(body["workers"][0]["id"], parse.as_str());

    let response = server.get("/admin/workers?service_type=video").await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let body: Value = server.post(&format!("/admin/workers/{}/offline", parse)).await.json();
    assert_eq!(body["status"], "offline");

    let response = server.post("/api/dispatch/parse").json(&json!({ "q": 1 })).await;
    assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);

    let response = server.delete(&format!("/admin/workers/{}", render)).await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["removed"]["id"], render.as_str());

    let response = server.get(&format!("/admin/workers/{}", render)).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    let response = server.delete(&format!("/admin/workers/{}", render)).await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
}

/// Strategy switching takes effect immediately and rejects unknown names
#[tokio::test]
async fn test_strategy_admin() {
    let gateway = gateway();
    let server = test_server(&gateway);

    let body: Value = server.get("/admin/load-balancer/strategy").await.json();
    assert_eq!(body["strategy"], "weighted_round_robin");
    assert_eq!(body["available"].as_array().unwrap().len(), 4);

    let response = server
        .put("/admin/load-balancer/strategy")
        .json(&json!({ "strategy": "least_connections" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["previous_strategy"], "weighted_round_robin");
    assert_eq!(body["strategy"], "least_connections");

    let response = server
        .put("/admin/load-balancer/strategy")
        .json(&json!({ "strategy": "random" }))
        .await;
    assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);

    let health: Value = server.get("/health").await.json();
    assert_eq!(health["strategy"], "least_connections");

    let stats: Value = server.get("/admin/load-balancer/stats").await.json();
    assert_eq!(stats["strategy"], "least_connections");
    assert_eq!(stats["total_selections"], 0);
}

/// Health counts selectable workers
#[tokio::test]
async fn test_health() {
    let gateway = gateway();
    let server = test_server(&gateway);
    register(&server, "a", 9400, "render").await;
    let b = register(&server, "b", 9401, "render").await;
    server.post(&format!("/admin/workers/{}/offline", b)).await;

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["workers"], 1);
}

/// The metrics endpoint exists only when an exporter is attached
#[tokio::test]
async fn test_metrics_endpoint() {
    let server = test_server(&gateway());
    let response = server.get("/admin/metrics").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    let recorder = build_prometheus_recorder(&MetricsConfig::default()).unwrap();
    let gateway = gateway().with_metrics(recorder.handle());
    let server = test_server(&gateway);
    let response = server.get("/admin/metrics").await;
    assert_eq!(response.status_code(), StatusCode::OK);
}
