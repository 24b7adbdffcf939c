use clap::Subcommand;
use flock_core::{
    cache::{Cache, CacheError, StoreCache, TypeTag},
    store::KvStore,
    sync::{contiguous_cached, SyncCursor},
};
use std::{path::Path, sync::Arc};

use super::utils::{print_info, CliError, CliResult};

#[derive(Subcommand)]
pub enum StoreCommands {
    /// Show the backfill cursor and how far the cached run extends past it
    Status {
        /// Path to the store file
        #[arg(short, long, default_value = "data/flock.redb")]
        path: String,
    },

    /// Print the cached response for a block
    GetBlock {
        /// Block number
        block_number: u64,

        /// Path to the store file
        #[arg(short, long, default_value = "data/flock.redb")]
        path: String,
    },
}

pub fn handle_store_command(command: StoreCommands) -> CliResult<()> {
    match command {
        StoreCommands::Status { path } => {
            let status = store_status(open_store(&path)?)?;
            println!("Store: {path}");
            println!("  Synced to block: {}", status.synced_to);
            println!("  Cached contiguously to: {}", status.contiguous_to);
            if status.contiguous_to > status.synced_to {
                print_info("The cursor will be extended over the cached run on next start");
            }
            Ok(())
        }
        StoreCommands::GetBlock { block_number, path } => {
            let payload = cached_block(open_store(&path)?, block_number)?;
            println!("{payload}");
            Ok(())
        }
    }
}

/// Backfill progress as recorded in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStatus {
    pub synced_to: u64,
    pub contiguous_to: u64,
}

fn open_store(path: &str) -> CliResult<Arc<KvStore>> {
    if !Path::new(path).exists() {
        return Err(CliError::Store(format!("Store not found: {path}")));
    }
    Ok(Arc::new(KvStore::open(path)?))
}

fn store_status(store: Arc<KvStore>) -> CliResult<StoreStatus> {
    let synced_to = SyncCursor::new(store.clone()).load()?;
    let cache = StoreCache::new(store);
    let contiguous_to = contiguous_cached(&cache, synced_to + 1, u64::MAX)?;

    Ok(StoreStatus { synced_to, contiguous_to })
}

/// Returns the cached response for `block_number`, pretty-printed when it is valid JSON.
fn cached_block(store: Arc<KvStore>, block_number: u64) -> CliResult<String> {
    let cache = StoreCache::new(store);
    let bytes = match cache.get(TypeTag::Block, &block_number.to_string()) {
        Ok(bytes) => bytes,
        Err(CacheError::KeyNotFound) => {
            return Err(CliError::Store(format!("Block {block_number} is not cached")));
        }
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_slice::<serde_json::Value>(&bytes) {
        Ok(value) => Ok(serde_json::to_string_pretty(&value)?),
        Err(_) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
    }
}
