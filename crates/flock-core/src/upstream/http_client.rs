use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Client, ClientBuilder, RequestBuilder,
};
use std::{sync::Arc, time::Duration};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::upstream::UpstreamError;

/// Retries after a 5xx response or a failed send. A timed-out send is never retried.
pub const MAX_RETRIES: u32 = 2;

/// Pause before retry `n` (1-based).
fn retry_delay(retry: u32) -> Duration {
    Duration::from_millis(100 * (1 << retry))
}

/// Longest a single call can take when every attempt runs to `timeout`, backoff included.
///
/// Permit acquisition is not counted.
#[must_use]
pub fn worst_case_duration(timeout: Duration) -> Duration {
    (1..=MAX_RETRIES).fold(timeout * (MAX_RETRIES + 1), |total, retry| total + retry_delay(retry))
}

/// Configuration for HTTP client concurrency, identity and timeout behavior.
///
/// Controls semaphore-based concurrency limiting with adaptive permit timeouts
/// based on permit availability.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Maximum number of concurrent HTTP requests allowed
    pub concurrent_limit: usize,
    /// Permit acquisition timeout in milliseconds under normal load
    pub permit_timeout_ms: u64,
    /// Permit acquisition timeout in milliseconds when permits are scarce
    pub permit_timeout_scarce_ms: u64,
    /// Number of available permits below which they are considered scarce
    pub scarce_permit_threshold: usize,
    /// `User-Agent` sent with every request
    pub user_agent: String,
    /// Extra headers sent with every request (API keys, auth tokens)
    pub headers: Vec<(String, String)>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            concurrent_limit: 256,
            permit_timeout_ms: 500,
            permit_timeout_scarce_ms: 200,
            scarce_permit_threshold: 16,
            user_agent: concat!("flock/", env!("CARGO_PKG_VERSION")).to_string(),
            headers: Vec::new(),
        }
    }
}

/// HTTP client with semaphore-based concurrency control.
///
/// Manages a pool of HTTP connections to the node with a configurable concurrency limit
/// and automatic retry of transient failures.
pub struct HttpClient {
    client: Client,
    concurrent_limit: Arc<Semaphore>,
    config: HttpClientConfig,
}

/// RAII guard ensuring semaphore permits are always released.
///
/// Uses [`OwnedSemaphorePermit`] which owns an `Arc` to the semaphore,
/// making it safe to hold across async boundaries.
struct PermitGuard {
    _permit: OwnedSemaphorePermit,
    semaphore: Arc<Semaphore>,
}

impl PermitGuard {
    fn new(permit: OwnedSemaphorePermit, semaphore: Arc<Semaphore>) -> Self {
        Self { _permit: permit, semaphore }
    }

    fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Drop for PermitGuard {
    fn drop(&mut self) {
        tracing::trace!(
            available_permits = self.semaphore.available_permits(),
            "permit guard dropped"
        );
    }
}

/// Builds the default header map, rejecting names or values that are not valid HTTP.
fn build_default_headers(headers: &[(String, String)]) -> Result<HeaderMap, UpstreamError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|e| {
            UpstreamError::ConnectionFailed(format!("invalid header name {name:?}: {e}"))
        })?;
        let value = HeaderValue::from_str(value.trim()).map_err(|e| {
            UpstreamError::ConnectionFailed(format!("invalid value for header {name}: {e}"))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

impl HttpClient {
    /// Creates a new HTTP client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying reqwest client fails to build.
    pub fn new() -> Result<Self, UpstreamError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Sanitizes network errors to prevent information disclosure.
    fn sanitize_network_error(error: &reqwest::Error) -> String {
        if error.is_connect() {
            "connection refused or unreachable".to_string()
        } else if error.is_timeout() {
            "connection timed out".to_string()
        } else if error.is_request() {
            "request failed".to_string()
        } else if error.is_body() {
            "response body error".to_string()
        } else if error.is_decode() {
            "response decode error".to_string()
        } else if error.is_redirect() {
            "too many redirects".to_string()
        } else {
            "network error".to_string()
        }
    }

    /// Creates a new HTTP client with the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured header is invalid or the reqwest client fails to build.
    pub fn with_config(config: HttpClientConfig) -> Result<Self, UpstreamError> {
        let default_headers = build_default_headers(&config.headers)?;

        let client = ClientBuilder::new()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(32)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(45))
            .use_rustls_tls()
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(config.user_agent.clone())
            .default_headers(default_headers)
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build http client");
                UpstreamError::ConnectionFailed(format!("HTTP client build failed: {e}"))
            })?;

        Ok(Self {
            client,
            concurrent_limit: Arc::new(Semaphore::new(config.concurrent_limit)),
            config,
        })
    }

    /// Sends a JSON POST request with semaphore-based concurrency control.
    ///
    /// # Errors
    ///
    /// - [`UpstreamError::Timeout`] if permit acquisition or request times out
    /// - [`UpstreamError::ConcurrencyLimit`] if the semaphore is closed
    /// - [`UpstreamError::HttpError`] for non-success HTTP status codes
    /// - [`UpstreamError::ConnectionFailed`] for network-related failures
    pub async fn send_request(
        &self,
        url: &str,
        body: bytes::Bytes,
        timeout: Duration,
    ) -> Result<bytes::Bytes, UpstreamError> {
        self.execute(url, || {
            self.client
                .post(url)
                .header("content-type", "application/json")
                // Bytes::clone() only bumps a reference count, so retries do not copy the body
                .body(body.clone())
                .timeout(timeout)
        })
        .await
    }

    /// Sends a GET request with the same concurrency control and retry policy as
    /// [`send_request`](Self::send_request).
    ///
    /// # Errors
    ///
    /// Same as [`send_request`](Self::send_request).
    pub async fn get(&self, url: &str, timeout: Duration) -> Result<bytes::Bytes, UpstreamError> {
        self.execute(url, || {
            self.client.get(url).header("accept", "application/json").timeout(timeout)
        })
        .await
    }

    async fn execute<F>(&self, url: &str, build: F) -> Result<bytes::Bytes, UpstreamError>
    where
        F: Fn() -> RequestBuilder,
    {
        let permit_timeout =
            if self.concurrent_limit.available_permits() < self.config.scarce_permit_threshold {
                Duration::from_millis(self.config.permit_timeout_scarce_ms)
            } else {
                Duration::from_millis(self.config.permit_timeout_ms)
            };

        let permit = tokio::time::timeout(
            permit_timeout,
            Arc::clone(&self.concurrent_limit).acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(
                url = url,
                available_permits = self.concurrent_limit.available_permits(),
                "http client semaphore acquisition timeout"
            );
            UpstreamError::Timeout
        })?
        .map_err(|_| {
            tracing::warn!(
                url = url,
                available_permits = self.concurrent_limit.available_permits(),
                "http client concurrency limit reached"
            );
            UpstreamError::ConcurrencyLimit(url.to_string())
        })?;

        let permit_guard = PermitGuard::new(permit, self.concurrent_limit.clone());

        tracing::trace!(
            available_permits = permit_guard.available_permits(),
            "http request started"
        );

        let mut retries = 0;

        loop {
            match build().send().await {
                Ok(response) => {
                    if response.status().is_success() {
                        let result = response.bytes().await.map_err(UpstreamError::Network);
                        tracing::trace!(
                            available_permits = permit_guard.available_permits(),
                            "http request completed"
                        );
                        return result;
                    } else if response.status().is_server_error() && retries < MAX_RETRIES {
                        retries += 1;
                        tokio::time::sleep(retry_delay(retries)).await;
                        continue;
                    }

                    let status = response.status().as_u16();
                    let raw_text = response.text().await.unwrap_or_default();
                    let sanitized_text = if raw_text.len() > 256 {
                        let cut = (0..=256).rev().find(|&i| raw_text.is_char_boundary(i));
                        format!("{}... (truncated)", &raw_text[..cut.unwrap_or(0)])
                    } else {
                        raw_text
                    };
                    tracing::trace!(
                        status = status,
                        available_permits = permit_guard.available_permits(),
                        "http request failed"
                    );
                    return Err(UpstreamError::HttpError(status, sanitized_text));
                }
                Err(e) if !e.is_timeout() && retries < MAX_RETRIES => {
                    retries += 1;
                    tokio::time::sleep(retry_delay(retries)).await;
                }
                Err(e) => {
                    tracing::trace!(
                        available_permits = permit_guard.available_permits(),
                        "http request error"
                    );
                    if e.is_timeout() {
                        return Err(UpstreamError::Timeout);
                    }
                    let sanitized_error = Self::sanitize_network_error(&e);
                    return Err(UpstreamError::ConnectionFailed(sanitized_error));
                }
            }
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.concurrent_limit.available_permits()
    }
}
