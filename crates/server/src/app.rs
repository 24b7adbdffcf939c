use crate::{middleware, router, AppState};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use flock_core::config::AppConfig;
use std::sync::Arc;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
};

/// Builds the full router with its layer stack.
///
/// The operational endpoints only get request ids; the JSON-RPC routes are additionally wrapped
/// in a concurrency limit, a body size limit, a request timeout and compression. CORS is
/// permissive on everything since the proxy is meant to be called from browsers.
pub fn create_app(state: Arc<AppState>, config: &AppConfig) -> Router {
    let (set_request_id, propagate_request_id) = middleware::create_request_id_layers();
    let (set_request_id_public, propagate_request_id_public) =
        middleware::create_request_id_layers();

    let mut public = Router::new().route("/health", get(router::handle_health));
    if config.metrics.enabled {
        public = public.route("/metrics", get(router::handle_metrics));
    }
    let public = public
        .with_state(state.clone())
        .layer(propagate_request_id_public)
        .layer(set_request_id_public);

    let mut rpc = Router::new()
        .route("/", get(router::handle_info).post(router::handle_rpc))
        .route(&config.routes.blockchain_path, post(router::handle_blockchain_rpc))
        .route(&config.routes.contracts_path, post(router::handle_contracts_rpc))
        .with_state(state);

    rpc = rpc.layer(ConcurrencyLimitLayer::new(config.server.max_concurrent_requests));
    rpc = rpc
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.server.max_body_bytes));
    rpc = rpc.layer(TimeoutLayer::new(config.request_timeout()));
    rpc = rpc.layer(CompressionLayer::new());

    // Layers run in reverse order: set first, then propagate
    rpc = rpc.layer(propagate_request_id).layer(set_request_id);

    public.merge(rpc).layer(CorsLayer::permissive())
}
