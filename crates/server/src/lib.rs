//! HTTP front end of the flock proxy.
//!
//! [`create_app`] assembles the axum router: JSON-RPC on `/` and on the per-endpoint route
//! paths, the node status pass-through on `GET /`, and the operational `/health` and `/metrics`
//! endpoints. Handlers live in [`router`] and share one [`AppState`].

pub mod app;
pub mod middleware;
pub mod router;

#[cfg(test)]
pub(crate) mod test_support;

pub use app::create_app;

use flock_core::{
    chain::FinalityState, config::InfoConfig, metrics::MetricsCollector, proxy::Dispatcher,
    sync::SyncCursor, upstream::NodeClient,
};
use std::sync::Arc;

/// State shared by every handler.
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub node: Arc<dyn NodeClient>,
    pub finality: Arc<FinalityState>,
    /// `None` when backfill is disabled.
    pub cursor: Option<SyncCursor>,
    pub metrics_collector: Arc<MetricsCollector>,
    pub info: InfoConfig,
}
