//! # Metrics
//!
//! Prometheus counters, gauges and histograms are recorded through the `metrics` facade and
//! rendered by a process-wide `metrics-exporter-prometheus` recorder for `/metrics`.
//!
//! A small set of totals is also kept in plain atomics on the collector itself so `/health` can
//! report them without parsing the exposition text. Those totals only count [`Source::Client`]
//! traffic; background work shows up in Prometheus under its own `source` label.
//!
//! | Metric | Kind | Labels |
//! |--------|------|--------|
//! | `flock_requests_total` | counter | `route` |
//! | `flock_cache_hits_total` | counter | `source` |
//! | `flock_cache_misses_total` | counter | `source` |
//! | `flock_cache_writes_total` | counter | `source`, `outcome` |
//! | `flock_upstream_batches_total` | counter | `source` |
//! | `flock_upstream_batch_size` | histogram | `source` |
//! | `flock_upstream_batch_duration_seconds` | histogram | `source` |
//! | `flock_upstream_errors_total` | counter | `source`, `error_type` |
//! | `flock_latest_safe_block` | gauge | |
//! | `flock_synced_to_block` | gauge | |

use crate::upstream::errors::UpstreamError;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    OnceLock,
};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn try_init_prometheus_recorder(
) -> Result<PrometheusHandle, metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().install_recorder()
}

fn init_prometheus_recorder() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| match try_init_prometheus_recorder() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    "Failed to install primary Prometheus recorder, attempting fallback"
                );

                let recorder = PrometheusBuilder::new().build_recorder();
                tracing::warn!(
                    "Using fallback Prometheus recorder (install error: {e}) - metrics may not be globally visible"
                );
                recorder.handle()
            }
        })
        .clone()
}

/// Who caused a cache lookup or an upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Inbound JSON-RPC and status requests.
    Client,
    Backfill,
    /// Finality watermark polling.
    Tracker,
}

impl Source {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Backfill => "backfill",
            Self::Tracker => "tracker",
        }
    }

    fn is_client(self) -> bool {
        self == Self::Client
    }
}

/// Totals reported by `/health`. Client traffic only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_writes: u64,
    pub upstream_batches: u64,
    pub upstream_errors: u64,
    pub cache_hit_rate: f64,
}

pub struct MetricsCollector {
    prometheus_handle: PrometheusHandle,
    total_requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_writes: AtomicU64,
    upstream_batches: AtomicU64,
    upstream_errors: AtomicU64,
}

impl MetricsCollector {
    /// # Errors
    ///
    /// Returns an error if the Prometheus recorder cannot be initialized.
    pub fn new() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let prometheus_handle = init_prometheus_recorder();

        Ok(Self {
            prometheus_handle,
            total_requests: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_writes: AtomicU64::new(0),
            upstream_batches: AtomicU64::new(0),
            upstream_errors: AtomicU64::new(0),
        })
    }

    /// Record an inbound JSON-RPC payload on `route`.
    pub fn record_request(&self, route: &'static str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        counter!("flock_requests_total", "route" => route).increment(1);
    }

    pub fn record_cache_hit(&self, source: Source) {
        if source.is_client() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        counter!("flock_cache_hits_total", "source" => source.as_str()).increment(1);
    }

    pub fn record_cache_miss(&self, source: Source) {
        if source.is_client() {
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        counter!("flock_cache_misses_total", "source" => source.as_str()).increment(1);
    }

    /// Record the outcome of a write-back attempt (`stored`, `already_cached`, `not_final`, ...).
    pub fn record_cache_write(&self, source: Source, outcome: &'static str) {
        if source.is_client() && outcome == "stored" {
            self.cache_writes.fetch_add(1, Ordering::Relaxed);
        }
        counter!("flock_cache_writes_total", "source" => source.as_str(), "outcome" => outcome)
            .increment(1);
    }

    /// Record one upstream batch call.
    pub fn record_upstream_batch(&self, source: Source, batch_size: usize, duration_ms: u64) {
        if source.is_client() {
            self.upstream_batches.fetch_add(1, Ordering::Relaxed);
        }
        let label = source.as_str();
        counter!("flock_upstream_batches_total", "source" => label).increment(1);
        #[allow(clippy::cast_precision_loss)]
        let (size, seconds) = (batch_size as f64, duration_ms as f64 / 1000.0);
        histogram!("flock_upstream_batch_size", "source" => label).record(size);
        histogram!("flock_upstream_batch_duration_seconds", "source" => label).record(seconds);
    }

    pub fn record_upstream_error(&self, source: Source, error: &UpstreamError) {
        if source.is_client() {
            self.upstream_errors.fetch_add(1, Ordering::Relaxed);
        }
        counter!(
            "flock_upstream_errors_total",
            "source" => source.as_str(),
            "error_type" => error.as_str()
        )
        .increment(1);
    }

    pub fn record_safe_block(&self, block_number: u64) {
        #[allow(clippy::cast_precision_loss)]
        let value = block_number as f64;
        gauge!("flock_latest_safe_block").set(value);
    }

    pub fn record_synced_to(&self, block_number: u64) {
        #[allow(clippy::cast_precision_loss)]
        let value = block_number as f64;
        gauge!("flock_synced_to_block").set(value);
    }

    #[must_use]
    pub fn get_metrics_summary(&self) -> MetricsSummary {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = cache_hits + cache_misses;

        #[allow(clippy::cast_precision_loss)]
        let cache_hit_rate =
            if lookups == 0 { 0.0 } else { cache_hits as f64 / lookups as f64 };

        MetricsSummary {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            upstream_batches: self.upstream_batches.load(Ordering::Relaxed),
            upstream_errors: self.upstream_errors.load(Ordering::Relaxed),
            cache_hit_rate,
        }
    }

    /// Get current metrics as a string (for Prometheus endpoint)
    #[must_use]
    pub fn get_prometheus_metrics(&self) -> String {
        self.prometheus_handle.render()
    }
}
