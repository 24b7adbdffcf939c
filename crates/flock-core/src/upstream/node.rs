//! Client for the upstream node: JSON-RPC batches and the status document.

use crate::{
    types::{JsonRpcRequest, JsonRpcResponse, NodeInfo},
    upstream::{HttpClient, UpstreamError},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Narrow contract the proxy needs from the upstream node.
///
/// The dispatcher and the finality tracker depend on this trait rather than on HTTP so that
/// both can be exercised against in-process fakes.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Sends `requests` as one JSON-RPC batch and returns the node's batch response.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the call fails, the status is not 2xx, or the body is not a
    /// non-empty JSON-RPC batch.
    async fn send_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, UpstreamError>;

    /// Fetches the node's status document.
    ///
    /// # Errors
    ///
    /// Returns [`UpstreamError`] if the call fails or the document lacks
    /// `lastVerifiedBlockNumber`.
    async fn node_info(&self) -> Result<NodeInfo, UpstreamError>;
}

/// Joins a base URL and a path without doubling or dropping the `/` between them.
#[must_use]
pub fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    format!("{}/{}", base.trim_end_matches('/'), path)
}

/// [`NodeClient`] over HTTP.
pub struct HttpNodeClient {
    http: HttpClient,
    rpc_url: String,
    info_url: String,
    timeout: Duration,
}

impl HttpNodeClient {
    /// Creates a client posting batches to `rpc_url` and reading status from
    /// `rpc_url` + `info_path`.
    #[must_use]
    pub fn new(http: HttpClient, rpc_url: &str, info_path: &str, timeout: Duration) -> Self {
        Self {
            http,
            rpc_url: rpc_url.to_string(),
            info_url: join_url(rpc_url, info_path),
            timeout,
        }
    }

    #[must_use]
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }
}

#[async_trait]
impl NodeClient for HttpNodeClient {
    async fn send_batch(
        &self,
        requests: &[JsonRpcRequest],
    ) -> Result<Vec<JsonRpcResponse>, UpstreamError> {
        let body = serde_json::to_vec(requests).map_err(|e| {
            UpstreamError::InvalidResponse(format!("failed to encode request batch: {e}"))
        })?;

        debug!(batch_size = requests.len(), "sending batch to node");
        let bytes = self.http.send_request(&self.rpc_url, body.into(), self.timeout).await?;

        let responses: Vec<JsonRpcResponse> = serde_json::from_slice(&bytes).map_err(|e| {
            UpstreamError::InvalidResponse(format!("expected a JSON-RPC batch: {e}"))
        })?;

        if responses.is_empty() {
            return Err(UpstreamError::InvalidResponse("node returned an empty batch".to_string()));
        }

        Ok(responses)
    }

    async fn node_info(&self) -> Result<NodeInfo, UpstreamError> {
        let bytes = self.http.get(&self.info_url, self.timeout).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| UpstreamError::InvalidResponse(format!("invalid node status: {e}")))
    }
}
