//! Backfill loop and finality tracking against a mocked node.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::mock_infrastructure::{NodeMockBuilder, TestCore};
use flock_core::{
    cache::{Cache, TypeTag},
    chain::FinalityTracker,
    metrics::MetricsSummary,
    sync::{BackfillConfig, BackfillSynchronizer, SyncCursor, WindowOutcome},
    types::JsonRpcRequest,
};
use serde_json::json;
use serial_test::serial;
use std::time::Duration;
use tokio::sync::broadcast;

fn backfill_config() -> BackfillConfig {
    BackfillConfig {
        window_size: 10,
        safety_margin: 10,
        window_delay: Duration::ZERO,
        idle_interval: Duration::from_millis(20),
    }
}

fn create_synchronizer(core: &TestCore) -> BackfillSynchronizer {
    BackfillSynchronizer::new(
        core.dispatcher.clone(),
        SyncCursor::new(core.store.clone()),
        core.finality.clone(),
        core.metrics_collector.clone(),
        backfill_config(),
    )
}

#[tokio::test]
#[serial]
async fn test_windows_walk_up_to_target() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(4);
    // target = floor(55 / 10) * 10 - 10 = 40
    let core = TestCore::with_watermark(&mock.url(), 55);
    let synchronizer = create_synchronizer(&core);

    let mut synced_to = synchronizer.bootstrap().unwrap();
    assert_eq!(synced_to, 0);

    let mut windows = Vec::new();
    loop {
        match synchronizer.sync_window(synced_to).await.unwrap() {
            WindowOutcome::Advanced { from, to } => {
                windows.push((from, to));
                synced_to = to;
            }
            WindowOutcome::Idle => break,
            WindowOutcome::Stalled { at } => panic!("stalled at {at}"),
        }
    }

    assert_eq!(windows, vec![(0, 10), (10, 20), (20, 30), (30, 40)]);
    assert_eq!(SyncCursor::new(core.store.clone()).load().unwrap(), 40);
    for block in 1..=40 {
        assert!(core.cache.has(TypeTag::Block, &block.to_string()).unwrap());
    }
    assert!(!core.cache.has(TypeTag::Block, "41").unwrap());
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_cursor_survives_restart() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches();
    let core = TestCore::with_watermark(&mock.url(), 35);

    let synchronizer = create_synchronizer(&core);
    let outcome = synchronizer.sync_window(synchronizer.bootstrap().unwrap()).await.unwrap();
    assert_eq!(outcome, WindowOutcome::Advanced { from: 0, to: 10 });
    drop(synchronizer);

    let restarted = create_synchronizer(&core);
    assert_eq!(restarted.bootstrap().unwrap(), 10);
    assert_eq!(
        restarted.sync_window(10).await.unwrap(),
        WindowOutcome::Advanced { from: 10, to: 20 }
    );
    assert_eq!(restarted.sync_window(20).await.unwrap(), WindowOutcome::Idle);
}

#[tokio::test]
#[serial]
async fn test_bootstrap_skips_blocks_cached_by_clients() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(0);
    let core = TestCore::with_watermark(&mock.url(), 1000);
    for block in 1..=25u64 {
        let payload = json!({ "jsonrpc": "2.0", "id": block, "result": { "blockNumber": block } });
        core.cache.set(TypeTag::Block, &block.to_string(), payload.to_string().as_bytes()).unwrap();
    }

    let synchronizer = create_synchronizer(&core);

    assert_eq!(synchronizer.bootstrap().unwrap(), 25);
    assert_eq!(SyncCursor::new(core.store.clone()).load().unwrap(), 25);
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_backfill_is_not_counted_as_client_traffic() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_echo_batches_expecting(1);
    let core = TestCore::with_watermark(&mock.url(), 25);
    let synchronizer = create_synchronizer(&core);

    assert_eq!(
        synchronizer.sync_window(0).await.unwrap(),
        WindowOutcome::Advanced { from: 0, to: 10 }
    );
    assert_eq!(core.metrics_collector.get_metrics_summary(), MetricsSummary::default());

    let responses = core
        .dispatcher
        .dispatch(vec![JsonRpcRequest::block_info(3).unwrap()], core.finality.safe_watermark())
        .await
        .unwrap();
    assert_eq!(responses[0].result_block_number(), Some(3));

    let summary = core.metrics_collector.get_metrics_summary();
    assert_eq!(summary.cache_hits, 1);
    assert_eq!(summary.cache_misses, 0);
    assert_eq!(summary.upstream_batches, 0);
    assert_eq!(summary.cache_writes, 0);
    mock.assert_all().await;
}

#[tokio::test]
#[serial]
async fn test_window_without_first_block_stalls() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_batch_body(".*", &json!([{ "jsonrpc": "2.0", "id": 1, "result": null }]));
    let core = TestCore::with_watermark(&mock.url(), 1000);
    let synchronizer = create_synchronizer(&core);

    let outcome = synchronizer.sync_window(0).await.unwrap();

    assert_eq!(outcome, WindowOutcome::Stalled { at: 1 });
    assert_eq!(SyncCursor::new(core.store.clone()).load().unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_failed_window_leaves_cursor() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_server_error();
    let core = TestCore::with_watermark(&mock.url(), 1000);
    let synchronizer = create_synchronizer(&core);

    assert!(synchronizer.sync_window(0).await.is_err());
    assert_eq!(SyncCursor::new(core.store.clone()).load().unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn test_background_loop_follows_tracker() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_status(45).mock_echo_batches();
    let core = TestCore::new(&mock.url());
    let (shutdown_tx, _) = broadcast::channel(1);

    let tracker = FinalityTracker::new(
        core.node.clone(),
        core.finality.clone(),
        core.metrics_collector.clone(),
        Duration::from_millis(50),
    );
    let tracker_handle = tracker.start_with_shutdown(shutdown_tx.subscribe());
    let backfill_handle = create_synchronizer(&core).start_with_shutdown(shutdown_tx.subscribe());

    // target = floor(45 / 10) * 10 - 10 = 30
    let cursor = SyncCursor::new(core.store.clone());
    tokio::time::timeout(Duration::from_secs(10), async {
        while cursor.load().unwrap() < 30 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("backfill did not reach the target");

    assert_eq!(core.finality.safe_watermark(), Some(45));

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(5), tracker_handle).await.unwrap().unwrap();
    tokio::time::timeout(Duration::from_secs(5), backfill_handle).await.unwrap().unwrap();

    assert_eq!(cursor.load().unwrap(), 30);
}

#[tokio::test]
#[serial]
async fn test_failed_poll_keeps_watermark_unset() {
    let mut mock = NodeMockBuilder::new().await;
    mock.mock_status_unavailable();
    let core = TestCore::new(&mock.url());
    let tracker = FinalityTracker::new(
        core.node.clone(),
        core.finality.clone(),
        core.metrics_collector.clone(),
        Duration::from_secs(3600),
    );

    assert!(tracker.poll_once().await.is_err());
    assert_eq!(core.finality.safe_watermark(), None);
}
