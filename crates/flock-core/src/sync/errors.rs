use crate::{cache::CacheError, proxy::ProxyError, store::StoreError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    #[error("Invalid sync cursor: {0}")]
    InvalidCursor(String),

    #[error("Failed to build backfill request: {0}")]
    Encode(#[from] serde_json::Error),
}
