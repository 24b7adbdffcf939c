//! `x-request-id` handling.
//!
//! Every inbound request gets an id (the caller's, if it sent one) which is echoed on the
//! response and attached to the proxy's log lines for that request.

use axum::http::{header::HeaderValue, HeaderMap, HeaderName, Request};
use std::sync::Arc;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use uuid::Uuid;

/// The header carrying the request id.
pub static X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Request id as seen by handlers.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub Arc<str>);

impl CorrelationId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Reads the id set by [`create_request_id_layers`], generating one if the request
    /// bypassed the layers or carried a non-text value.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        headers
            .get(&X_REQUEST_ID)
            .and_then(|value| value.to_str().ok())
            .filter(|id| !id.is_empty())
            .map_or_else(Self::generate, Self::new)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// UUID v4 ids for tower-http's request id middleware.
#[derive(Clone, Copy, Default)]
pub struct UuidRequestIdGenerator;

impl MakeRequestId for UuidRequestIdGenerator {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        Some(RequestId::new(HeaderValue::from_str(&id).ok()?))
    }
}

/// Returns the set and propagate layers, to be applied as
/// `.layer(propagate).layer(set)` so that the id is set before it is copied to the response.
pub fn create_request_id_layers(
) -> (SetRequestIdLayer<UuidRequestIdGenerator>, PropagateRequestIdLayer) {
    let set_layer = SetRequestIdLayer::new(X_REQUEST_ID.clone(), UuidRequestIdGenerator);
    let propagate_layer = PropagateRequestIdLayer::new(X_REQUEST_ID.clone());

    (set_layer, propagate_layer)
}
