use crate::{middleware::CorrelationId, AppState};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use flock_core::{
    config::InfoConfig,
    metrics::Source,
    proxy::{normalize, Normalized},
    types::{NodeInfo, BLOCK_INFO},
};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Endpoint prefix of the contracts route.
pub const CONTRACTS_ENDPOINT: &str = "contracts";

/// Returned when even an error reply could not be encoded.
const INTERNAL_ERROR_BODY: &[u8] =
    br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;

type RpcResponse = (StatusCode, [(&'static str, &'static str); 1], Vec<u8>);

fn json_body(status: StatusCode, body: Vec<u8>) -> RpcResponse {
    (status, [("content-type", "application/json")], body)
}

/// Handles JSON-RPC on `/`; methods are forwarded as sent.
pub async fn handle_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    process_rpc(&state, &CorrelationId::from_headers(&headers), &body, None, "root").await
}

/// Handles JSON-RPC on the blockchain route; methods get the `blockchain.` prefix.
pub async fn handle_blockchain_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = CorrelationId::from_headers(&headers);
    process_rpc(&state, &request_id, &body, Some(BLOCK_INFO.endpoint), "blockchain").await
}

/// Handles JSON-RPC on the contracts route; methods get the `contracts.` prefix.
pub async fn handle_contracts_rpc(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = CorrelationId::from_headers(&headers);
    process_rpc(&state, &request_id, &body, Some(CONTRACTS_ENDPOINT), "contracts").await
}

/// Normalizes, dispatches and renders one inbound payload.
///
/// A payload that is not JSON-RPC at all gets a 400 with its `-32700`/`-32600` error object.
/// Everything else is a 200: a failed dispatch is reported in-band as a single `-69` error.
async fn process_rpc(
    state: &AppState,
    request_id: &CorrelationId,
    body: &[u8],
    endpoint: Option<&str>,
    route: &'static str,
) -> RpcResponse {
    state.metrics_collector.record_request(route);

    let Normalized { requests, framing } = match normalize(body, endpoint) {
        Ok(normalized) => normalized,
        Err(e) => {
            debug!(request_id = %request_id, route = route, error = %e, "rejected inbound payload");
            let encoded = serde_json::to_vec(&e.to_response())
                .unwrap_or_else(|_| INTERNAL_ERROR_BODY.to_vec());
            return json_body(StatusCode::BAD_REQUEST, encoded);
        }
    };

    let single_id = if framing.is_single() { requests.first().map(|r| r.id) } else { None };
    let request_count = requests.len();

    let rendered = match state.dispatcher.dispatch(requests, state.finality.safe_watermark()).await
    {
        Ok(responses) => framing.render(responses),
        Err(e) => {
            warn!(
                request_id = %request_id,
                route = route,
                requests = request_count,
                error = %e,
                "dispatch failed"
            );
            framing.render_failure(&e, single_id)
        }
    };

    match rendered {
        Ok(encoded) => json_body(StatusCode::OK, encoded),
        Err(e) => {
            error!(request_id = %request_id, route = route, error = %e, "failed to render response");
            json_body(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR_BODY.to_vec())
        }
    }
}

/// Applies the public-facing rewrites to the node's status document.
#[must_use]
pub fn rewrite_node_info(mut info: NodeInfo, config: &InfoConfig) -> NodeInfo {
    info.success = true;

    if let Some(domain) = &config.public_domain {
        info.domain.clone_from(domain);
    }

    if let Some(notice) = &config.notice {
        let message = &mut info.disabled_methods.message;
        if message.is_empty() {
            message.clone_from(notice);
        } else {
            message.push(' ');
            message.push_str(notice);
        }
    }

    info
}

/// Serves the node's status document on `GET /`.
pub async fn handle_info(State(state): State<Arc<AppState>>) -> Response {
    state.metrics_collector.record_request("info");

    let info = match state.node.node_info().await {
        Ok(info) => info,
        Err(e) => {
            warn!(error = %e, "failed to fetch node info");
            state.metrics_collector.record_upstream_error(Source::Client, &e);
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": e.to_string(), "success": false })),
            )
                .into_response();
        }
    };

    match serde_json::to_value(rewrite_node_info(info, &state.info)) {
        Ok(value) => (StatusCode::OK, Json(value)).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode node info");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": e.to_string(), "success": false })),
            )
                .into_response()
        }
    }
}

#[allow(clippy::unused_async)]
pub async fn handle_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let prometheus_metrics = state.metrics_collector.get_prometheus_metrics();

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        prometheus_metrics,
    )
}

/// Reports the watermark, the backfill cursor and request totals.
///
/// Unhealthy (503) until the node status has been read successfully at least once.
#[allow(clippy::unused_async)]
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let watermark = state.finality.safe_watermark();
    let synced_to = state.cursor.as_ref().and_then(|cursor| match cursor.load() {
        Ok(synced_to) => Some(synced_to),
        Err(e) => {
            warn!(error = %e, "failed to read sync cursor");
            None
        }
    });
    let summary = state.metrics_collector.get_metrics_summary();

    let health_status = serde_json::json!({
        "status": if watermark.is_some() { "healthy" } else { "unhealthy" },
        "node": {
            "reachable": watermark.is_some(),
            "latest_safe_block": watermark,
            "seconds_since_last_poll": state.finality.age_seconds()
        },
        "sync": {
            "enabled": state.cursor.is_some(),
            "synced_to_block": synced_to
        },
        "requests": summary,
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    (
        if watermark.is_some() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE },
        [("content-type", "application/json")],
        serde_json::to_string(&health_status).unwrap_or_default(),
    )
}
