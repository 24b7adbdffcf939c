use crate::{
    chain::FinalityState,
    metrics::{MetricsCollector, Source},
    upstream::{NodeClient, UpstreamError},
};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::broadcast,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Polls the node's status document and publishes `lastVerifiedBlockNumber` as the finality
/// watermark.
///
/// A failed poll leaves the watermark untouched: a stale watermark only makes the cache more
/// conservative, never less safe. The loop never terminates on errors.
pub struct FinalityTracker {
    node: Arc<dyn NodeClient>,
    state: Arc<FinalityState>,
    metrics_collector: Arc<MetricsCollector>,
    poll_interval: Duration,
}

impl FinalityTracker {
    #[must_use]
    pub fn new(
        node: Arc<dyn NodeClient>,
        state: Arc<FinalityState>,
        metrics_collector: Arc<MetricsCollector>,
        poll_interval: Duration,
    ) -> Self {
        Self { node, state, metrics_collector, poll_interval }
    }

    /// Polls the node once and updates the watermark on success.
    ///
    /// # Errors
    ///
    /// Returns the [`UpstreamError`] of the failed poll; the watermark is unchanged.
    pub async fn poll_once(&self) -> Result<u64, UpstreamError> {
        Self::poll(self.node.as_ref(), &self.state, &self.metrics_collector).await
    }

    async fn poll(
        node: &dyn NodeClient,
        state: &FinalityState,
        metrics_collector: &MetricsCollector,
    ) -> Result<u64, UpstreamError> {
        let info = node.node_info().await?;
        let safe_block = info.last_verified_block_number;
        state.update(safe_block);
        metrics_collector.record_safe_block(safe_block);
        debug!(safe_block = safe_block, "finality watermark polled");
        Ok(safe_block)
    }

    /// Starts the poll loop as a background task.
    ///
    /// The first poll runs immediately; later polls run every `poll_interval`. The task exits
    /// when the shutdown channel fires.
    pub fn start_with_shutdown(
        &self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        let node = self.node.clone();
        let state = self.state.clone();
        let metrics_collector = self.metrics_collector.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut interval = interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = Self::poll(node.as_ref(), &state, &metrics_collector).await {
                            metrics_collector.record_upstream_error(Source::Tracker, &e);
                            warn!(
                                error = %e,
                                watermark = ?state.safe_watermark(),
                                "finality poll failed, keeping previous watermark"
                            );
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("finality tracker shutting down");
                        break;
                    }
                }
            }
        })
    }
}
