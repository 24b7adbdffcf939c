//! Inbound payload normalization.
//!
//! A JSON-RPC payload is either a bare request object or an array of them. [`normalize`] turns
//! both into one ordered list of [`JsonRpcRequest`] and a [`Framing`] that remembers how to
//! shape the reply: a bare object is answered with a bare object, an array with an array.
//!
//! Elements of an array that are not valid request envelopes do not fail their siblings; they
//! are answered in place with an `Invalid Request` error.

use crate::{
    proxy::errors::{NormalizeError, ProxyError},
    types::{JsonRpcRequest, JsonRpcResponse},
};
use serde::Deserialize;
use serde_json::value::RawValue;

/// Requests ready for dispatch plus the shape of the reply.
#[derive(Debug)]
pub struct Normalized {
    pub requests: Vec<JsonRpcRequest>,
    pub framing: Framing,
}

/// How the reply to a normalized payload is assembled.
#[derive(Debug, Default)]
pub struct Framing {
    single: bool,
    /// Error responses for rejected array elements, by position in the original payload.
    rejected: Vec<(usize, JsonRpcResponse)>,
}

#[derive(Deserialize)]
struct IdField {
    #[serde(default)]
    id: Option<i64>,
}

/// Prefixes `method` with `endpoint.` unless it already carries that prefix.
#[must_use]
pub fn qualify(method: &str, endpoint: Option<&str>) -> String {
    match endpoint {
        Some(endpoint)
            if !endpoint.is_empty()
                && !method.strip_prefix(endpoint).is_some_and(|rest| rest.starts_with('.')) =>
        {
            format!("{endpoint}.{method}")
        }
        _ => method.to_string(),
    }
}

/// Parses an inbound body into requests, qualifying each method with `endpoint`.
///
/// # Errors
///
/// - [`NormalizeError::Parse`] if the body is not JSON
/// - [`NormalizeError::InvalidRequest`] if a bare object is not a request envelope, or the body
///   is neither an object nor an array
/// - [`NormalizeError::EmptyBatch`] for `[]`
pub fn normalize(body: &[u8], endpoint: Option<&str>) -> Result<Normalized, NormalizeError> {
    let raw: &RawValue = serde_json::from_slice(body)?;
    let text = raw.get();

    match text.as_bytes().first() {
        Some(b'[') => {
            let elements: Vec<&RawValue> = serde_json::from_str(text)?;
            if elements.is_empty() {
                return Err(NormalizeError::EmptyBatch);
            }

            let mut requests = Vec::with_capacity(elements.len());
            let mut framing = Framing::default();
            for (position, element) in elements.into_iter().enumerate() {
                match parse_request(element, endpoint) {
                    Ok(request) => requests.push(request),
                    Err(e) => framing.rejected.push((position, e.to_response())),
                }
            }

            Ok(Normalized { requests, framing })
        }
        Some(b'{') => {
            let mut request = parse_request(raw, endpoint)?;
            request.single = true;
            Ok(Normalized {
                requests: vec![request],
                framing: Framing { single: true, rejected: Vec::new() },
            })
        }
        _ => Err(NormalizeError::InvalidRequest {
            id: None,
            reason: "expected a request object or an array of requests".to_string(),
        }),
    }
}

fn parse_request(
    raw: &RawValue,
    endpoint: Option<&str>,
) -> Result<JsonRpcRequest, NormalizeError> {
    match serde_json::from_str::<JsonRpcRequest>(raw.get()) {
        Ok(mut request) => {
            request.method = qualify(&request.method, endpoint);
            Ok(request)
        }
        Err(e) => {
            let id = serde_json::from_str::<IdField>(raw.get()).ok().and_then(|field| field.id);
            Err(NormalizeError::InvalidRequest { id, reason: e.to_string() })
        }
    }
}

impl Framing {
    #[must_use]
    pub fn is_single(&self) -> bool {
        self.single
    }

    /// Puts rejected elements back at their original positions among the dispatched responses.
    #[must_use]
    pub fn merge(&self, responses: Vec<JsonRpcResponse>) -> Vec<JsonRpcResponse> {
        if self.rejected.is_empty() {
            return responses;
        }

        let mut merged = Vec::with_capacity(responses.len() + self.rejected.len());
        let mut rejected = self.rejected.iter().peekable();
        let mut dispatched = responses.into_iter();

        loop {
            match rejected.peek() {
                Some((position, response)) if *position == merged.len() => {
                    merged.push(response.clone());
                    rejected.next();
                }
                _ => match dispatched.next() {
                    Some(response) => merged.push(response),
                    None => {
                        merged.extend(rejected.map(|(_, response)| response.clone()));
                        break;
                    }
                },
            }
        }

        merged
    }

    /// Serializes the reply, mirroring the inbound shape.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if a response cannot be serialized.
    pub fn render(&self, responses: Vec<JsonRpcResponse>) -> Result<Vec<u8>, ProxyError> {
        let merged = self.merge(responses);
        let encoded = match merged.as_slice() {
            [only] if self.single && only.single => serde_json::to_vec(only),
            _ => serde_json::to_vec(&merged),
        };
        encoded.map_err(|e| ProxyError::Internal(format!("failed to encode response: {e}")))
    }

    /// Serializes the single error object returned when the whole dispatch failed.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if the error object cannot be serialized.
    pub fn render_failure(
        &self,
        error: &ProxyError,
        single_id: Option<i64>,
    ) -> Result<Vec<u8>, ProxyError> {
        let id = if self.single { single_id } else { None };
        serde_json::to_vec(&error.to_response(id))
            .map_err(|e| ProxyError::Internal(format!("failed to encode response: {e}")))
    }
}

impl Normalized {
    /// Number of positions in the reply, rejected elements included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len() + self.framing.rejected.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
