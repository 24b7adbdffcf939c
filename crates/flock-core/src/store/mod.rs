//! Durable key-value store backed by a single `redb` file.
//!
//! Every [`KvStore::set`] is its own committed write transaction and every read opens its own
//! read transaction, so each key write is atomic and readers never observe a partial value.
//! Writers do not need to coordinate with one another beyond that: `redb` serializes write
//! transactions internally.

use redb::{Database, ReadableDatabase, TableDefinition};
use std::path::Path;
use thiserror::Error;

/// The single table holding every entry.
///
/// Cached responses and bookkeeping values (such as the backfill cursor) share this table and
/// are kept apart by their key layout.
const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// Errors raised by the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

macro_rules! impl_store_error_from {
    ($($error_type:ty),*) => {
        $(
            impl From<$error_type> for StoreError {
                fn from(err: $error_type) -> Self {
                    Self::Database(err.to_string())
                }
            }
        )*
    };
}

impl_store_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError
);

/// Transactional byte-keyed store.
pub struct KvStore {
    database: Database,
}

impl KvStore {
    /// Opens the store at `path`, creating the file and its parent directories if needed.
    ///
    /// Existing data is preserved; the table is created only if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory cannot be created or the file is not a valid
    /// database (or is locked by another process).
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let database = Database::create(path)?;

        let write_txn = database.begin_write()?;
        {
            let _kv = write_txn.open_table(KV)?;
        }
        write_txn.commit()?;

        tracing::debug!(path = %path.display(), "key-value store opened");
        Ok(Self { database })
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        let read_txn = self.database.begin_read()?;
        let table = read_txn.open_table(KV)?;
        Ok(table.get(key)?.map(|guard| guard.value().to_vec()))
    }

    /// Returns `true` if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on storage failure.
    pub fn has(&self, key: &[u8]) -> Result<bool, StoreError> {
        let read_txn = self.database.begin_read()?;
        let table = read_txn.open_table(KV)?;
        Ok(table.get(key)?.is_some())
    }

    /// Stores `value` under `key` and commits.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write or the commit fails. Nothing is written in that case.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<(), StoreError> {
        let write_txn = self.database.begin_write()?;
        {
            let mut table = write_txn.open_table(KV)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}
