//! The assembled router against a mocked node.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::{block_info_request, rpc_request, NodeMockBuilder, TestCore};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use flock_core::{
    cache::{Cache, TypeTag},
    chain::FinalityTracker,
    config::{AppConfig, InfoConfig},
    sync::SyncCursor,
    types::UPSTREAM_FAILURE_CODE,
};
use serde_json::{json, Value};
use serial_test::serial;
use server::AppState;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;

fn create_router(core: &TestCore, info: InfoConfig) -> Router {
    create_router_with_config(core, info, &AppConfig::default())
}

fn create_router_with_config(core: &TestCore, info: InfoConfig, config: &AppConfig) -> Router {
    let state = Arc::new(AppState {
        dispatcher: core.dispatcher.clone(),
        node: core.node.clone(),
        finality: core.finality.clone(),
        cursor: Some(SyncCursor::new(core.store.clone())),
        metrics_collector: core.metrics_collector.clone(),
        info,
    });
    server::create_app(state, config)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn post(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

#[tokio::test]
#[serial]
async fn test_status_document_is_rewritten() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_status(500);
    let core = TestCore::new(&mock.url());
    let router = create_router(
        &core,
        InfoConfig {
            public_domain: Some("https://flock.example/".to_string()),
            notice: Some("Cached by flock.".to_string()),
        },
    );

    let (status, body) = send(&router, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["domain"], "https://flock.example/");
    assert_eq!(body["disabledMethods"]["message"], "Some methods are disabled. Cached by flock.");
    assert_eq!(body["disabledMethods"]["contracts"], json!(["findOne"]));
    assert_eq!(body["lastVerifiedBlockNumber"], 500);
    assert_eq!(body["SSCnodeVersion"], "1.10.0");
    assert_eq!(body["chainId"], "mainnet-hive");
}

#[tokio::test]
#[serial]
async fn test_status_document_unavailable() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_status_unavailable();
    let core = TestCore::new(&mock.url());
    let router = create_router(&core, InfoConfig::default());

    let (status, body) = send(&router, get("/")).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["success"], false);
}

#[tokio::test]
#[serial]
async fn test_blockchain_route_caches_final_blocks() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(1);
    let core = TestCore::with_watermark(&mock.url(), 1000);
    let router = create_router(&core, InfoConfig::default());

    let (status, first) = send(&router, post("/blockchain", &block_info_request(1, 77))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["id"], 1);
    assert_eq!(first["result"]["blockNumber"], 77);
    assert!(core.cache.has(TypeTag::Block, "77").unwrap());

    let (status, second) = send(&router, post("/blockchain", &block_info_request(2, 77))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], 2);
    assert_eq!(second["result"], first["result"]);

    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_batch_on_root_keeps_order_and_shape() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches();
    let core = TestCore::with_watermark(&mock.url(), 1000);
    let router = create_router(&core, InfoConfig::default());

    let batch = json!([
        rpc_request(3, "contracts.find", Some(json!({ "contract": "tokens" }))),
        block_info_request(1, 9),
        rpc_request(2, "blockchain.getLatestBlockInfo", None),
    ]);
    let (status, body) = send(&router, post("/", &batch)).await;

    assert_eq!(status, StatusCode::OK);
    let responses = body.as_array().unwrap();
    assert_eq!(responses.len(), 3);
    assert_eq!(responses[0]["id"], 3);
    assert_eq!(responses[0]["result"]["method"], "contracts.find");
    assert_eq!(responses[1]["result"]["blockNumber"], 9);
    assert_eq!(responses[2]["result"]["method"], "blockchain.getLatestBlockInfo");
}

#[tokio::test]
#[serial]
async fn test_node_failure_is_in_band_error() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_server_error();
    let core = TestCore::with_watermark(&mock.url(), 1000);
    let router = create_router(&core, InfoConfig::default());

    let (status, body) =
        send(&router, post("/", &json!([rpc_request(1, "a", None), rpc_request(2, "b", None)])))
            .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.is_object());
    assert_eq!(body["id"], Value::Null);
    assert_eq!(body["error"]["code"], UPSTREAM_FAILURE_CODE);
}

#[tokio::test]
#[serial]
async fn test_silent_node_is_answered_before_request_timeout() {
    // Accepts connections and never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let silent_node = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let mut config = AppConfig::default();
    config.node.timeout_seconds = 1;
    config.server.request_timeout_seconds = 5;
    config.validate().unwrap();

    let core = TestCore::with_node_timeout(&format!("http://{addr}/"), config.node_timeout());
    core.finality.update(1000);
    let router = create_router_with_config(&core, InfoConfig::default(), &config);

    let start = std::time::Instant::now();
    let (status, body) = send(&router, post("/", &rpc_request(1, "x", None))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], 1);
    assert_eq!(body["error"]["code"], UPSTREAM_FAILURE_CODE);
    // One attempt, no retries after the timeout
    assert!(start.elapsed() < Duration::from_secs(2), "took {:?}", start.elapsed());
    silent_node.abort();
}

#[tokio::test]
#[serial]
async fn test_malformed_payload_never_reaches_node() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(0);
    let core = TestCore::with_watermark(&mock.url(), 1000);
    let router = create_router(&core, InfoConfig::default());

    let request = Request::builder()
        .method("POST")
        .uri("/")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&router, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], -32700);
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_health_follows_finality_tracker() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_status(2048);
    let core = TestCore::new(&mock.url());
    let router = create_router(&core, InfoConfig::default());

    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "unhealthy");

    let tracker = FinalityTracker::new(
        core.node.clone(),
        core.finality.clone(),
        core.metrics_collector.clone(),
        Duration::from_secs(3600),
    );
    assert_eq!(tracker.poll_once().await.unwrap(), 2048);

    let (status, body) = send(&router, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["node"]["latest_safe_block"], 2048);
    assert_eq!(body["sync"]["enabled"], true);
    assert_eq!(body["sync"]["synced_to_block"], 0);
}
