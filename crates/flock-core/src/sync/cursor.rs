use crate::{store::KvStore, sync::SyncError};
use std::sync::Arc;

/// Reserved key of the cursor. Block entries are tagged (`b_<n>`) and never collide with it.
pub const CURSOR_KEY: &[u8] = b"synced_to_block";

/// Persisted backfill progress: the highest block number known to be cached contiguously from
/// block 1. Stored as decimal text.
#[derive(Clone)]
pub struct SyncCursor {
    store: Arc<KvStore>,
}

impl SyncCursor {
    #[must_use]
    pub fn new(store: Arc<KvStore>) -> Self {
        Self { store }
    }

    /// Reads the cursor, `0` if it was never written.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidCursor`] if the stored value is not a decimal block number,
    /// or [`SyncError::Store`] on storage failure.
    pub fn load(&self) -> Result<u64, SyncError> {
        let Some(raw) = self.store.get(CURSOR_KEY)? else {
            return Ok(0);
        };

        let text = std::str::from_utf8(&raw)
            .map_err(|e| SyncError::InvalidCursor(format!("not UTF-8: {e}")))?;
        text.trim().parse().map_err(|e| SyncError::InvalidCursor(format!("{text:?}: {e}")))
    }

    /// # Errors
    ///
    /// Returns [`SyncError::Store`] if the write fails.
    pub fn persist(&self, synced_to: u64) -> Result<(), SyncError> {
        self.store.set(CURSOR_KEY, synced_to.to_string().as_bytes())?;
        Ok(())
    }
}
