//! Dispatcher behavior over a real store and a mocked node.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::{block_info_request, rpc_request, NodeMockBuilder, TestCore};
use flock_core::{
    cache::{Cache, TypeTag},
    proxy::ProxyError,
    types::{JsonRpcRequest, UPSTREAM_FAILURE_CODE},
    upstream::UpstreamError,
};
use serde_json::{json, Value};
use serial_test::serial;

fn requests(values: &[Value]) -> Vec<JsonRpcRequest> {
    values.iter().map(|value| serde_json::from_str(&value.to_string()).unwrap()).collect()
}

fn result(response: &flock_core::types::JsonRpcResponse) -> Value {
    serde_json::from_str(response.result.as_ref().unwrap().get()).unwrap()
}

#[tokio::test]
#[serial]
async fn test_mixed_batch_makes_one_upstream_call() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(1);
    let core = TestCore::with_watermark(&mock.url(), 1000);

    let batch = requests(&[block_info_request(1, 5), rpc_request(2, "otherMethod", None)]);
    let responses = core.dispatcher.dispatch(batch, core.finality.safe_watermark()).await.unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, Some(1));
    assert_eq!(result(&responses[0])["blockNumber"], 5);
    assert_eq!(responses[1].id, Some(2));
    assert_eq!(result(&responses[1])["method"], "otherMethod");
    assert!(core.cache.has(TypeTag::Block, "5").unwrap());
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_repeat_lookup_is_served_from_cache() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(1);
    let core = TestCore::with_watermark(&mock.url(), 1000);

    core.dispatcher
        .dispatch(requests(&[block_info_request(1, 42)]), core.finality.safe_watermark())
        .await
        .unwrap();
    let responses = core
        .dispatcher
        .dispatch(requests(&[block_info_request(9, 42)]), core.finality.safe_watermark())
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].id, Some(9));
    assert_eq!(result(&responses[0])["blockNumber"], 42);

    let summary = core.metrics_collector.get_metrics_summary();
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.cache_misses, 1);
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_block_above_watermark_is_not_cached() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(2);
    let core = TestCore::with_watermark(&mock.url(), 10);

    for _ in 0..2 {
        let responses = core
            .dispatcher
            .dispatch(requests(&[block_info_request(1, 11)]), core.finality.safe_watermark())
            .await
            .unwrap();
        assert_eq!(result(&responses[0])["blockNumber"], 11);
    }

    assert!(!core.cache.has(TypeTag::Block, "11").unwrap());
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_nothing_is_cached_without_watermark() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches();
    let core = TestCore::new(&mock.url());

    core.dispatcher.dispatch(requests(&[block_info_request(1, 1)]), None).await.unwrap();

    assert!(!core.cache.has(TypeTag::Block, "1").unwrap());
}

#[tokio::test]
#[serial]
async fn test_null_result_is_not_cached() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_batch_body(".*", &json!([{ "jsonrpc": "2.0", "id": 1, "result": null }]));
    let core = TestCore::with_watermark(&mock.url(), 1000);

    let responses = core
        .dispatcher
        .dispatch(requests(&[block_info_request(1, 7)]), core.finality.safe_watermark())
        .await
        .unwrap();

    assert!(responses[0].is_null_result());
    assert!(!core.cache.has(TypeTag::Block, "7").unwrap());
}

#[tokio::test]
#[serial]
async fn test_transport_failure_fails_whole_batch() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_server_error();
    let core = TestCore::with_watermark(&mock.url(), 1000);

    let result = core
        .dispatcher
        .dispatch(
            requests(&[block_info_request(1, 5), rpc_request(2, "otherMethod", None)]),
            core.finality.safe_watermark(),
        )
        .await;

    let error = result.unwrap_err();
    assert!(matches!(error, ProxyError::Upstream(UpstreamError::HttpError(500, _))));
    assert_eq!(error.code(), UPSTREAM_FAILURE_CODE);
    assert!(!core.cache.has(TypeTag::Block, "5").unwrap());
    assert_eq!(core.metrics_collector.get_metrics_summary().upstream_errors, 1);
}

#[tokio::test]
#[serial]
async fn test_unanswered_request_gets_error_in_place() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_batch_body(".*", &json!([{ "jsonrpc": "2.0", "id": 2, "result": { "ok": true } }]));
    let core = TestCore::with_watermark(&mock.url(), 1000);

    let responses = core
        .dispatcher
        .dispatch(
            requests(&[rpc_request(1, "first", None), rpc_request(2, "second", None)]),
            core.finality.safe_watermark(),
        )
        .await
        .unwrap();

    assert_eq!(responses.len(), 2);
    assert_eq!(responses[0].id, Some(1));
    assert_eq!(responses[0].error_code(), Some(i64::from(UPSTREAM_FAILURE_CODE)));
    assert_eq!(responses[1].id, Some(2));
    assert_eq!(result(&responses[1])["ok"], true);
}

#[tokio::test]
#[serial]
async fn test_duplicate_ids_are_answered_in_order() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches();
    let core = TestCore::with_watermark(&mock.url(), 1000);

    let responses = core
        .dispatcher
        .dispatch(
            requests(&[rpc_request(4, "first", None), rpc_request(4, "second", None)]),
            core.finality.safe_watermark(),
        )
        .await
        .unwrap();

    assert_eq!(result(&responses[0])["method"], "first");
    assert_eq!(result(&responses[1])["method"], "second");
}

#[tokio::test]
#[serial]
async fn test_cached_entry_matches_upstream_payload() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches();
    let core = TestCore::with_watermark(&mock.url(), 1000);

    core.dispatcher
        .dispatch(requests(&[block_info_request(3, 8)]), core.finality.safe_watermark())
        .await
        .unwrap();

    let stored: Value =
        serde_json::from_slice(&core.cache.get(TypeTag::Block, "8").unwrap()).unwrap();
    assert_eq!(stored["result"]["blockNumber"], 8);
    assert_eq!(stored["result"]["hash"], format!("{:064x}", 8));
}

#[tokio::test]
#[serial]
async fn test_sequence_params_bypass_cache() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(2);
    let core = TestCore::with_watermark(&mock.url(), 1000);

    core.dispatcher
        .dispatch(requests(&[block_info_request(1, 5)]), core.finality.safe_watermark())
        .await
        .unwrap();
    assert!(core.cache.has(TypeTag::Block, "5").unwrap());

    let responses = core
        .dispatcher
        .dispatch(
            requests(&[rpc_request(2, "getBlockInfo", Some(json!([5])))]),
            core.finality.safe_watermark(),
        )
        .await
        .unwrap();

    assert_eq!(responses[0].id, Some(2));
    assert_eq!(result(&responses[0])["method"], "getBlockInfo");
    assert_eq!(core.metrics_collector.get_metrics_summary().cache_hits, 0);
    mock.assert_all().await;
}
