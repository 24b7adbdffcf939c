use crate::{
    types::{
        JsonRpcResponse, INTERNAL_ERROR_CODE, INVALID_REQUEST_CODE, PARSE_ERROR_CODE,
        UPSTREAM_FAILURE_CODE,
    },
    upstream::errors::UpstreamError,
};

/// Failure of a whole dispatch.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The upstream batch call failed; no partial results are returned.
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// JSON-RPC error code reported to the client.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Upstream(_) => UPSTREAM_FAILURE_CODE,
            Self::Internal(_) => INTERNAL_ERROR_CODE,
        }
    }

    /// Builds the single error object returned in place of the whole batch.
    #[must_use]
    pub fn to_response(&self, id: Option<i64>) -> JsonRpcResponse {
        JsonRpcResponse::error(id, self.code(), self.to_string())
    }
}

/// Rejection of an inbound payload before any dispatch happens.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid request: {reason}")]
    InvalidRequest { id: Option<i64>, reason: String },

    #[error("Invalid request: empty batch")]
    EmptyBatch,
}

impl NormalizeError {
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Parse(_) => PARSE_ERROR_CODE,
            Self::InvalidRequest { .. } | Self::EmptyBatch => INVALID_REQUEST_CODE,
        }
    }

    #[must_use]
    pub fn to_response(&self) -> JsonRpcResponse {
        let id = match self {
            Self::InvalidRequest { id, .. } => *id,
            Self::Parse(_) | Self::EmptyBatch => None,
        };
        JsonRpcResponse::error(id, self.code(), self.to_string())
    }
}
