use thiserror::Error;

/// Errors that can occur when talking to the upstream node.
///
/// Every variant is a transport failure from the proxy's point of view: the dispatch that
/// triggered it is aborted as a whole.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Request exceeded the configured timeout duration.
    #[error("Request timeout")]
    Timeout,

    /// Failed to establish a connection to the node.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// HTTP-level error occurred (non-2xx status code).
    ///
    /// First field is the HTTP status code, second is the (truncated) response body.
    #[error("HTTP error: {0}")]
    HttpError(u16, String),

    /// Network-level error from the underlying HTTP client.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Response from the node could not be parsed or was not a batch.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Maximum concurrent requests limit has been reached.
    #[error("Concurrency limit reached: {0}")]
    ConcurrencyLimit(String),
}

impl UpstreamError {
    /// Returns `true` if this error is transient and the request could be retried later.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout |
            Self::Network(_) |
            Self::ConnectionFailed(_) |
            Self::ConcurrencyLimit(_) => true,
            Self::HttpError(status, _) => (500..=599).contains(status) || *status == 429,
            Self::InvalidResponse(_) => false,
        }
    }

    /// Returns a static label for metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ConnectionFailed(_) => "connection_failed",
            Self::HttpError(_, _) => "http_error",
            Self::Network(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::ConcurrencyLimit(_) => "concurrency_limit",
        }
    }
}
