//! Backfill synchronization.
//!
//! The [`BackfillSynchronizer`] walks block numbers sequentially from a persisted
//! [`SyncCursor`] up to a margin below the finality watermark, fetching each window of blocks
//! through the dispatcher so they land in the cache.
//!
//! ```text
//!  bootstrap: cursor ──► extend over b_<cursor+1>, b_<cursor+2>, ... already cached
//!
//!  loop:
//!    target = floor(watermark / window) * window - margin
//!    cursor < target ─► fetch [cursor+1 ..= min(cursor+window, target)]
//!                       advance over the cached prefix, persist, sleep window_delay
//!    otherwise       ─► sleep idle_interval
//! ```

pub mod backfill;
pub mod cursor;
pub mod errors;

pub use backfill::{
    contiguous_cached, sync_target, BackfillConfig, BackfillSynchronizer, WindowOutcome,
};
pub use cursor::{SyncCursor, CURSOR_KEY};
pub use errors::SyncError;
