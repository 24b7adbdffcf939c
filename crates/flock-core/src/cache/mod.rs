//! Typed-key cache over the durable store.
//!
//! # Key Layout
//!
//! ```text
//!   <tag> '_' <logical key>
//!
//!   b_12345   → serialized block-info response for block 12345
//! ```
//!
//! Tags are single reserved characters, one per cacheable method, so the `_` separator never
//! occurs inside a tag. Logical keys are decimal block numbers and never contain it either.
//!
//! # Invariants
//!
//! - Entries are immutable once written: finalized block data never changes, so there is no
//!   invalidation, TTL or eviction. Storage is unbounded.
//! - Writes are idempotent. The dispatcher and the backfill synchronizer may race on the same
//!   block; both write the same content and the store's per-key transactions keep every value
//!   whole.

use crate::store::{KvStore, StoreError};
use std::{fmt, sync::Arc};
use thiserror::Error;

/// Errors returned by [`Cache`] operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key is not cached. A miss, not a failure.
    #[error("Key not found")]
    KeyNotFound,

    /// The underlying store failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

/// Type tag distinguishing cached entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// Block-info responses, keyed by block number.
    Block,
}

impl TypeTag {
    /// Returns the reserved key character for this tag.
    #[must_use]
    pub const fn as_char(self) -> char {
        match self {
            Self::Block => 'b',
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Builds the store key for a tagged entry.
#[must_use]
pub fn cache_key(tag: TypeTag, key: &str) -> String {
    format!("{tag}_{key}")
}

/// Typed-key cache contract.
///
/// Implementations must be safe to call from many request tasks and the backfill loop at once.
pub trait Cache: Send + Sync {
    /// Stores `value` under `(tag, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] if the write could not be committed.
    fn set(&self, tag: TypeTag, key: &str, value: &[u8]) -> Result<(), CacheError>;

    /// Returns the value under `(tag, key)`.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::KeyNotFound`] on a miss and [`CacheError::Storage`] on failure.
    fn get(&self, tag: TypeTag, key: &str) -> Result<Vec<u8>, CacheError>;

    /// Returns `true` if `(tag, key)` is cached.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Storage`] on failure.
    fn has(&self, tag: TypeTag, key: &str) -> Result<bool, CacheError>;
}

/// [`Cache`] implementation on top of [`KvStore`].
pub struct StoreCache {
    store: Arc<KvStore>,
}

impl StoreCache {
    #[must_use]
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }
}

impl Cache for StoreCache {
    fn set(&self, tag: TypeTag, key: &str, value: &[u8]) -> Result<(), CacheError> {
        self.store.set(cache_key(tag, key).as_bytes(), value)?;
        Ok(())
    }

    fn get(&self, tag: TypeTag, key: &str) -> Result<Vec<u8>, CacheError> {
        self.store.get(cache_key(tag, key).as_bytes())?.ok_or(CacheError::KeyNotFound)
    }

    fn has(&self, tag: TypeTag, key: &str) -> Result<bool, CacheError> {
        Ok(self.store.has(cache_key(tag, key).as_bytes())?)
    }
}
