#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::AppState;
use async_trait::async_trait;
use flock_core::{
    cache::StoreCache,
    chain::FinalityState,
    config::InfoConfig,
    metrics::MetricsCollector,
    proxy::Dispatcher,
    store::KvStore,
    sync::SyncCursor,
    types::{
        DisabledMethods, JsonRpcRequest, JsonRpcResponse, NodeInfo, BLOCK_INFO, JSONRPC_VERSION_COW,
    },
    upstream::{NodeClient, UpstreamError},
};
use serde_json::value::RawValue;
use std::sync::{Arc, Mutex};

/// In-process node: answers every request, records the methods it saw.
pub struct StaticNode {
    safe_block: Option<u64>,
    fail_batches: bool,
    seen: Mutex<Vec<String>>,
}

impl StaticNode {
    /// `safe_block` of `None` makes the status call fail.
    pub fn new(safe_block: Option<u64>) -> Self {
        Self { safe_block, fail_batches: false, seen: Mutex::new(Vec::new()) }
    }

    pub fn failing(safe_block: Option<u64>) -> Self {
        Self { fail_batches: true, ..Self::new(safe_block) }
    }

    pub fn safe_block(&self) -> Option<u64> {
        self.safe_block
    }

    pub fn seen_methods(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl NodeClient for StaticNode {
    async fn send_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, UpstreamError> {
        self.seen.lock().unwrap().extend(requests.iter().map(|r| r.method.clone()));
        if self.fail_batches {
            return Err(UpstreamError::ConnectionFailed("connection refused".to_string()));
        }

        Ok(requests
            .iter()
            .map(|request| {
                let result = match request.cacheable_block() {
                    Some(n) => format!(r#"{{"blockNumber":{n}}}"#),
                    None if BLOCK_INFO.matches(&request.method) => "null".to_string(),
                    None => format!(r#"{{"method":"{}"}}"#, request.method),
                };
                JsonRpcResponse {
                    jsonrpc: JSONRPC_VERSION_COW,
                    id: Some(request.id),
                    result: Some(RawValue::from_string(result).unwrap()),
                    error: None,
                    single: false,
                }
            })
            .collect())
    }

    async fn node_info(&self) -> Result<NodeInfo, UpstreamError> {
        let block = self.safe_block.ok_or(UpstreamError::Timeout)?;
        Ok(NodeInfo {
            success: false,
            last_block_number: block + 5,
            last_verified_block_number: block,
            domain: "node.internal".to_string(),
            disabled_methods: DisabledMethods {
                message: "Some methods are disabled.".to_string(),
                ..DisabledMethods::default()
            },
            ..NodeInfo::default()
        })
    }
}

/// Builds handler state over a temporary redb store, with the watermark seeded from `node`.
pub fn create_test_state(node: Arc<StaticNode>) -> (tempfile::TempDir, Arc<AppState>) {
    create_test_state_with_info(node, InfoConfig::default())
}

pub fn create_test_state_with_info(
    node: Arc<StaticNode>,
    info: InfoConfig,
) -> (tempfile::TempDir, Arc<AppState>) {
    let temp_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(KvStore::open(temp_dir.path().join("flock.redb")).unwrap());
    let metrics_collector = Arc::new(MetricsCollector::new().expect("valid test metrics"));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::new(StoreCache::new(store.clone())),
        node.clone(),
        metrics_collector.clone(),
    ));

    let finality = Arc::new(FinalityState::new());
    if let Some(block) = node.safe_block() {
        finality.update(block);
    }

    let state = Arc::new(AppState {
        dispatcher,
        node,
        finality,
        cursor: Some(SyncCursor::new(store)),
        metrics_collector,
        info,
    });
    (temp_dir, state)
}
