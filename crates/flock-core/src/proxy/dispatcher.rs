use crate::{
    cache::{Cache, CacheError, TypeTag},
    metrics::{MetricsCollector, Source},
    proxy::errors::ProxyError,
    types::{JsonRpcRequest, JsonRpcResponse},
    upstream::NodeClient,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Instant,
};
use tracing::{debug, warn};

/// Message of the error synthesized for a request the node's batch did not answer.
pub const MISSING_RESPONSE_MESSAGE: &str = "no response from upstream for request";

/// What became of one position of the inbound batch during partitioning.
#[derive(Debug)]
enum Slot {
    /// Served from cache, id already rewritten to the caller's.
    CacheHit(JsonRpcResponse),
    /// Forwarded upstream. `write_back` is the block number to cache on a plain miss.
    PendingUpstream { id: i64, write_back: Option<u64> },
}

/// Result of offering an upstream response to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheWrite {
    Stored,
    AlreadyCached,
    /// The block is above the watermark, or the watermark is not known yet.
    NotFinal,
    /// Error response, null result, or a result without a block number.
    Uncacheable,
    /// The store failed; the response is still returned to the caller.
    Failed,
}

impl CacheWrite {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::AlreadyCached => "already_cached",
            Self::NotFinal => "not_final",
            Self::Uncacheable => "uncacheable",
            Self::Failed => "failed",
        }
    }
}

/// Splits a batch into cache hits and one upstream batch, then merges the answers back in
/// request order.
///
/// Only block-info lookups are ever cached, and only when the block the node returns is at or
/// below the finality watermark passed to [`Dispatcher::dispatch`].
pub struct Dispatcher {
    cache: Arc<dyn Cache>,
    node: Arc<dyn NodeClient>,
    metrics_collector: Arc<MetricsCollector>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        cache: Arc<dyn Cache>,
        node: Arc<dyn NodeClient>,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Self {
        Self { cache, node, metrics_collector }
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Answers `requests` in order, one response per request.
    ///
    /// At most one upstream call is made. The output carries `single` iff it has exactly one
    /// response and that request was a bare object.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Upstream`] if the upstream batch call fails. No partial results
    /// are returned in that case.
    pub async fn dispatch(
        &self,
        requests: Vec<JsonRpcRequest>,
        watermark: Option<u64>,
    ) -> Result<Vec<JsonRpcResponse>, ProxyError> {
        self.dispatch_from(Source::Client, requests, watermark).await
    }

    /// Same as [`Dispatcher::dispatch`], with metrics recorded under `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Upstream`] if the upstream batch call fails.
    pub async fn dispatch_from(
        &self,
        source: Source,
        requests: Vec<JsonRpcRequest>,
        watermark: Option<u64>,
    ) -> Result<Vec<JsonRpcResponse>, ProxyError> {
        let single = requests.len() == 1 && requests.iter().all(|r| r.single);

        let mut slots = Vec::with_capacity(requests.len());
        let mut upstream = Vec::new();

        for request in requests {
            match request.cacheable_block() {
                Some(block_number) => match self.lookup(block_number, request.id) {
                    Ok(Some(hit)) => {
                        self.metrics_collector.record_cache_hit(source);
                        slots.push(Slot::CacheHit(hit));
                    }
                    Ok(None) => {
                        self.metrics_collector.record_cache_miss(source);
                        slots.push(Slot::PendingUpstream {
                            id: request.id,
                            write_back: Some(block_number),
                        });
                        upstream.push(request);
                    }
                    Err(e) => {
                        warn!(block_number = block_number, error = %e, "cache lookup failed, forwarding");
                        slots.push(Slot::PendingUpstream { id: request.id, write_back: None });
                        upstream.push(request);
                    }
                },
                None => {
                    slots.push(Slot::PendingUpstream { id: request.id, write_back: None });
                    upstream.push(request);
                }
            }
        }

        let mut answers = if upstream.is_empty() {
            Answers::default()
        } else {
            let start = Instant::now();
            let responses = match self.node.send_batch(&upstream).await {
                Ok(responses) => responses,
                Err(e) => {
                    self.metrics_collector.record_upstream_error(source, &e);
                    warn!(batch_size = upstream.len(), error = %e, "upstream batch failed");
                    return Err(ProxyError::Upstream(e));
                }
            };
            let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            self.metrics_collector.record_upstream_batch(source, upstream.len(), duration_ms);
            Answers::reconcile(&upstream, responses)
        };

        let mut output = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Slot::CacheHit(hit) => output.push(hit),
                Slot::PendingUpstream { id, write_back } => {
                    let response = answers.take(id).unwrap_or_else(|| {
                        warn!(id = id, "upstream batch has no response for request");
                        JsonRpcResponse::upstream_failure(Some(id), MISSING_RESPONSE_MESSAGE)
                    });

                    if let Some(block_number) = write_back {
                        let outcome = self.cache_if_final(&response, watermark);
                        self.metrics_collector.record_cache_write(source, outcome.as_str());
                        debug!(
                            block_number = block_number,
                            outcome = outcome.as_str(),
                            "write-back"
                        );
                    }

                    output.push(response);
                }
            }
        }

        if single {
            if let Some(only) = output.first_mut() {
                only.single = true;
            }
        }

        Ok(output)
    }

    /// Stores a block-info response if the block it describes is final and not yet cached.
    ///
    /// The entry is keyed by the block number found in the result itself. Store failures are
    /// logged and reported as [`CacheWrite::Failed`]; they never fail the request.
    pub fn cache_if_final(&self, response: &JsonRpcResponse, watermark: Option<u64>) -> CacheWrite {
        let Some(block_number) = response.result_block_number() else {
            return CacheWrite::Uncacheable;
        };

        match watermark {
            Some(safe) if block_number <= safe => {}
            _ => return CacheWrite::NotFinal,
        }

        let key = block_number.to_string();
        match self.cache.has(TypeTag::Block, &key) {
            Ok(true) => return CacheWrite::AlreadyCached,
            Ok(false) => {}
            Err(e) => {
                warn!(block_number = block_number, error = %e, "cache check failed");
                return CacheWrite::Failed;
            }
        }

        let value = match serde_json::to_vec(response) {
            Ok(value) => value,
            Err(e) => {
                warn!(block_number = block_number, error = %e, "failed to encode block for cache");
                return CacheWrite::Failed;
            }
        };

        match self.cache.set(TypeTag::Block, &key, &value) {
            Ok(()) => CacheWrite::Stored,
            Err(e) => {
                warn!(block_number = block_number, error = %e, "cache write failed");
                CacheWrite::Failed
            }
        }
    }

    /// Reads a cached block and rewrites its id to the caller's.
    fn lookup(&self, block_number: u64, id: i64) -> Result<Option<JsonRpcResponse>, CacheError> {
        let bytes = match self.cache.get(TypeTag::Block, &block_number.to_string()) {
            Ok(bytes) => bytes,
            Err(CacheError::KeyNotFound) => return Ok(None),
            Err(e) => return Err(e),
        };

        match serde_json::from_slice::<JsonRpcResponse>(&bytes) {
            Ok(cached) => Ok(Some(cached.with_id(id))),
            Err(e) => {
                warn!(block_number = block_number, error = %e, "undecodable cache entry, forwarding");
                Ok(None)
            }
        }
    }
}

/// Upstream responses waiting to be matched to their requests.
#[derive(Default)]
struct Answers {
    by_id: HashMap<i64, VecDeque<JsonRpcResponse>>,
}

impl Answers {
    /// Groups responses by id. Requests sharing an id are answered in arrival order.
    fn reconcile(requests: &[JsonRpcRequest], responses: Vec<JsonRpcResponse>) -> Self {
        if responses.len() != requests.len()
            || requests.iter().zip(&responses).any(|(req, resp)| resp.id != Some(req.id))
        {
            debug!(
                requested = requests.len(),
                received = responses.len(),
                "upstream batch out of order or incomplete, matching by id"
            );
        }

        let mut by_id: HashMap<i64, VecDeque<JsonRpcResponse>> = HashMap::new();
        for response in responses {
            match response.id {
                Some(id) => by_id.entry(id).or_default().push_back(response),
                None => debug!("dropping upstream response without id"),
            }
        }
        Self { by_id }
    }

    fn take(&mut self, id: i64) -> Option<JsonRpcResponse> {
        self.by_id.get_mut(&id)?.pop_front()
    }
}
