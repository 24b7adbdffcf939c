//! Integration tests for `HttpNodeClient` against a mocked node.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::{create_node_client, NodeMockBuilder};
use flock_core::{
    types::JsonRpcRequest,
    upstream::{HttpClientConfig, UpstreamError},
};
use mockito::Matcher;
use serde_json::json;
use serial_test::serial;

#[tokio::test]
#[serial]
async fn test_batch_round_trip() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches();
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    let requests = vec![
        JsonRpcRequest::block_info(12).unwrap(),
        JsonRpcRequest::new("contracts.find", None, 2),
    ];
    let responses = node.send_batch(&requests).await.unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, Some(12));
    assert_eq!(responses[0].result_block_number(), Some(12));
    assert_eq!(responses[1].id, Some(2));
    assert!(responses[1].result.as_ref().unwrap().get().contains("contracts.find"));
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_batch_is_posted_as_json_array() {
    let mut mock = NodeMockBuilder::new().await;
    let server = mock.get_server();
    let batch = server
        .mock("POST", "/")
        .match_header("content-type", "application/json")
        .match_body(Matcher::Json(json!([
            {"jsonrpc": "2.0", "id": 5, "method": "blockchain.getBlockInfo", "params": {"blockNumber": 5}}
        ])))
        .with_status(200)
        .with_body(r#"[{"jsonrpc":"2.0","id":5,"result":{"blockNumber":5}}]"#)
        .create_async()
        .await;
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    node.send_batch(&[JsonRpcRequest::block_info(5).unwrap()]).await.unwrap();

    batch.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_identity_headers_are_sent() {
    let mut mock = NodeMockBuilder::new().await;
    let server = mock.get_server();
    let batch = server
        .mock("POST", "/")
        .match_header("user-agent", "flock-test/1.0")
        .match_header("x-api-key", "secret")
        .with_status(200)
        .with_body(r#"[{"jsonrpc":"2.0","id":1,"result":null}]"#)
        .create_async()
        .await;
    let config = HttpClientConfig {
        user_agent: "flock-test/1.0".to_string(),
        headers: vec![("x-api-key".to_string(), "secret".to_string())],
        ..HttpClientConfig::default()
    };
    let node = create_node_client(&mock.url(), config);

    node.send_batch(&[JsonRpcRequest::new("ping", None, 1)]).await.unwrap();

    batch.assert_async().await;
}

#[tokio::test]
#[serial]
async fn test_server_error_is_transport_failure() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_server_error();
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    let result = node.send_batch(&[JsonRpcRequest::new("ping", None, 1)]).await;

    assert!(matches!(result, Err(UpstreamError::HttpError(500, _))));
}

#[tokio::test]
#[serial]
async fn test_non_batch_body_is_invalid_response() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_batch_body(".*", &json!({"jsonrpc": "2.0", "id": 1, "result": "not a batch"}));
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    let result = node.send_batch(&[JsonRpcRequest::new("ping", None, 1)]).await;

    assert!(matches!(result, Err(UpstreamError::InvalidResponse(_))));
}

#[tokio::test]
#[serial]
async fn test_empty_batch_is_invalid_response() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_batch_body(".*", &json!([]));
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    let result = node.send_batch(&[JsonRpcRequest::new("ping", None, 1)]).await;

    assert!(matches!(result, Err(UpstreamError::InvalidResponse(_))));
}

#[tokio::test]
#[serial]
async fn test_status_document() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_status(4321);
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    let info = node.node_info().await.unwrap();

    assert_eq!(info.last_verified_block_number, 4321);
    assert_eq!(info.last_block_number, 4324);
    assert_eq!(info.ssc_node_version, "1.10.0");
    assert_eq!(info.disabled_methods.contracts, vec!["findOne".to_string()]);
}

#[tokio::test]
#[serial]
async fn test_status_without_watermark_is_rejected() {
    let mut mock = NodeMockBuilder::new().await;
    let _status = mock
        .get_server()
        .mock("GET", "/")
        .with_status(200)
        .with_body(r#"{"success":true,"lastBlockNumber":10}"#)
        .create_async()
        .await;
    let node = create_node_client(&mock.url(), HttpClientConfig::default());

    assert!(matches!(node.node_info().await, Err(UpstreamError::InvalidResponse(_))));
}

#[tokio::test]
#[serial]
async fn test_unreachable_node() {
    // Nothing listens on port 9 (discard) on a test machine
    let node = create_node_client("http://127.0.0.1:9", HttpClientConfig::default());

    let result = node.send_batch(&[JsonRpcRequest::new("ping", None, 1)]).await;

    assert!(matches!(
        result,
        Err(UpstreamError::ConnectionFailed(_) | UpstreamError::Timeout)
    ));
}
