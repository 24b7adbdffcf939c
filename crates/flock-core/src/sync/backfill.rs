use crate::{
    cache::{Cache, CacheError, TypeTag},
    chain::FinalityState,
    metrics::{MetricsCollector, Source},
    proxy::Dispatcher,
    sync::{SyncCursor, SyncError},
    types::JsonRpcRequest,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Tuning of the backfill loop.
#[derive(Debug, Clone)]
pub struct BackfillConfig {
    /// Blocks requested per upstream batch.
    pub window_size: u64,
    /// Distance kept below the window-aligned watermark.
    pub safety_margin: u64,
    /// Pause between windows and before retrying a failed window. Zero skips it.
    pub window_delay: Duration,
    /// Pause when caught up before re-reading the watermark.
    pub idle_interval: Duration,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            window_size: 100,
            safety_margin: 100,
            window_delay: Duration::from_millis(100),
            idle_interval: Duration::from_secs(3),
        }
    }
}

/// What one pass of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Nothing to do: the watermark is unknown or the cursor already reached the target.
    Idle,
    /// The cursor moved from `from` to `to` and was persisted.
    Advanced { from: u64, to: u64 },
    /// The window was fetched but its first block is still not cached.
    Stalled { at: u64 },
}

/// Highest block the backfill walks to for a given watermark.
///
/// The watermark is rounded down to a multiple of `window_size` and `safety_margin` is kept
/// below that.
#[must_use]
pub fn sync_target(watermark: u64, window_size: u64, safety_margin: u64) -> u64 {
    let window_size = window_size.max(1);
    (watermark / window_size * window_size).saturating_sub(safety_margin)
}

/// Returns the last block of the unbroken cached run starting at `start`, capped at `end`,
/// or `start - 1` if `start` itself is not cached.
///
/// # Errors
///
/// Returns [`CacheError::Storage`] if a lookup fails.
pub fn contiguous_cached(cache: &dyn Cache, start: u64, end: u64) -> Result<u64, CacheError> {
    let mut block_number = start;
    while block_number <= end && cache.has(TypeTag::Block, &block_number.to_string())? {
        block_number += 1;
    }
    Ok(block_number - 1)
}

/// Walks block numbers upward from the persisted cursor and caches each finalized block, so
/// that lookups never have to reach the node for old blocks.
///
/// Windows go through [`Dispatcher::dispatch`], which owns every cache write; the
/// synchronizer only decides what to ask for and how far the cursor may move.
pub struct BackfillSynchronizer {
    dispatcher: Arc<Dispatcher>,
    cursor: SyncCursor,
    state: Arc<FinalityState>,
    metrics_collector: Arc<MetricsCollector>,
    config: BackfillConfig,
}

impl BackfillSynchronizer {
    #[must_use]
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        cursor: SyncCursor,
        state: Arc<FinalityState>,
        metrics_collector: Arc<MetricsCollector>,
        config: BackfillConfig,
    ) -> Self {
        Self { dispatcher, cursor, state, metrics_collector, config }
    }

    /// Loads the cursor and extends it over blocks already cached directly above it.
    ///
    /// Blocks cached by client traffic while backfill was behind are counted here instead of
    /// being fetched again. The extended cursor is persisted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the cursor cannot be read or written, or the cache fails.
    pub fn bootstrap(&self) -> Result<u64, SyncError> {
        let stored = self.cursor.load()?;
        let synced_to = self.contiguous_from(stored + 1, u64::MAX)?;

        if synced_to > stored {
            self.cursor.persist(synced_to)?;
            info!(from = stored, to = synced_to, "sync cursor extended over cached blocks");
        }

        self.metrics_collector.record_synced_to(synced_to);
        Ok(synced_to)
    }

    /// Fetches the next window above `synced_to` and advances the cursor over the blocks that
    /// are now cached, contiguous from the window start.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] if the upstream call, the cache or the cursor write fails. The
    /// cursor is left where it was.
    pub async fn sync_window(&self, synced_to: u64) -> Result<WindowOutcome, SyncError> {
        let Some(watermark) = self.state.safe_watermark() else {
            return Ok(WindowOutcome::Idle);
        };

        let target = sync_target(watermark, self.config.window_size, self.config.safety_margin);
        if synced_to >= target {
            return Ok(WindowOutcome::Idle);
        }

        let start = synced_to + 1;
        let end = target.min(synced_to.saturating_add(self.config.window_size.max(1)));
        let requests =
            (start..=end).map(JsonRpcRequest::block_info).collect::<Result<Vec<_>, _>>()?;

        debug!(start = start, end = end, watermark = watermark, "fetching backfill window");
        self.dispatcher.dispatch_from(Source::Backfill, requests, Some(watermark)).await?;

        let confirmed_to = self.contiguous_from(start, end)?;
        if confirmed_to == synced_to {
            warn!(block_number = start, "backfill window did not cache its first block");
            return Ok(WindowOutcome::Stalled { at: start });
        }

        self.cursor.persist(confirmed_to)?;
        self.metrics_collector.record_synced_to(confirmed_to);
        info!(synced_to = confirmed_to, target = target, "backfill window synced");

        Ok(WindowOutcome::Advanced { from: synced_to, to: confirmed_to })
    }

    fn contiguous_from(&self, start: u64, end: u64) -> Result<u64, SyncError> {
        Ok(contiguous_cached(self.dispatcher.cache().as_ref(), start, end)?)
    }

    /// Starts the backfill loop as a background task that runs until the shutdown channel fires.
    ///
    /// Failures are logged and the same window is retried after `window_delay`; the loop never
    /// terminates on its own.
    pub fn start_with_shutdown(
        self,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut synced_to = loop {
                match self.bootstrap() {
                    Ok(synced_to) => break synced_to,
                    Err(e) => {
                        warn!(error = %e, "backfill bootstrap failed, retrying");
                        tokio::select! {
                            () = tokio::time::sleep(self.config.idle_interval) => {}
                            _ = shutdown_rx.recv() => {
                                info!("backfill synchronizer shutting down");
                                return;
                            }
                        }
                    }
                }
            };
            info!(synced_to = synced_to, "backfill synchronizer started");

            loop {
                let pause = match self.sync_window(synced_to).await {
                    Ok(WindowOutcome::Idle) => self.config.idle_interval,
                    Ok(WindowOutcome::Advanced { to, .. }) => {
                        synced_to = to;
                        self.config.window_delay
                    }
                    Ok(WindowOutcome::Stalled { .. }) => self.config.window_delay,
                    Err(e) => {
                        warn!(synced_to = synced_to, error = %e, "backfill window failed, retrying");
                        self.config.window_delay
                    }
                };

                tokio::select! {
                    () = tokio::time::sleep(pause) => {}
                    _ = shutdown_rx.recv() => {
                        info!(synced_to = synced_to, "backfill synchronizer shutting down");
                        break;
                    }
                }
            }
        })
    }
}
