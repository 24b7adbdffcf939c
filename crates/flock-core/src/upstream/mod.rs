//! Communication with the upstream node.
//!
//! - [`HttpClient`]: pooled reqwest client with a semaphore concurrency limit and retry of
//!   transient failures
//! - [`NodeClient`]: the two calls the proxy makes, a JSON-RPC batch and the status document,
//!   with [`HttpNodeClient`] as the HTTP implementation
//! - [`UpstreamError`]: transport failures

pub mod errors;
pub mod http_client;
pub mod node;

pub use errors::UpstreamError;
pub use http_client::{worst_case_duration, HttpClient, HttpClientConfig, MAX_RETRIES};
pub use node::{join_url, HttpNodeClient, NodeClient};
