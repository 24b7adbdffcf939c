//! Process-wide finality watermark.
//!
//! `FinalityState` is the single source of truth for "is this block final". The
//! [`FinalityTracker`](super::FinalityTracker) is its only writer; the dispatcher and the
//! backfill synchronizer read it.

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{trace, warn};

/// Returns the current unix timestamp in seconds.
fn current_unix_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Latest known safe block number, unset until the node has been observed once.
///
/// # Thread Safety
///
/// All methods are lock-free. The watermark is published with `Release` and read with
/// `Acquire`; the `observed` flag is stored after the value so a reader that sees it set also
/// sees the block number it guards.
///
/// # Example
///
/// ```
/// use flock_core::chain::FinalityState;
///
/// let state = FinalityState::new();
/// assert_eq!(state.safe_watermark(), None);
///
/// state.update(1000);
/// assert_eq!(state.safe_watermark(), Some(1000));
/// assert!(state.is_final(1000));
/// assert!(!state.is_final(1001));
/// ```
#[derive(Debug)]
pub struct FinalityState {
    latest_safe_block: AtomicU64,
    observed: AtomicBool,
    last_update: AtomicU64,
}

impl Default for FinalityState {
    fn default() -> Self {
        Self::new()
    }
}

impl FinalityState {
    /// Creates an unset watermark: nothing is final until the first successful poll.
    #[must_use]
    pub fn new() -> Self {
        Self {
            latest_safe_block: AtomicU64::new(0),
            observed: AtomicBool::new(false),
            last_update: AtomicU64::new(0),
        }
    }

    /// Returns the watermark, or `None` before the node has been observed.
    #[inline]
    #[must_use]
    pub fn safe_watermark(&self) -> Option<u64> {
        if self.observed.load(Ordering::Acquire) {
            Some(self.latest_safe_block.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Returns `true` if `block_number` is at or below the watermark.
    #[inline]
    #[must_use]
    pub fn is_final(&self, block_number: u64) -> bool {
        self.safe_watermark().is_some_and(|safe| block_number <= safe)
    }

    /// Overwrites the watermark with the value reported by the node.
    ///
    /// The node is authoritative, so a lower value is applied as well; it is logged because it
    /// means the node moved backwards.
    pub fn update(&self, latest_safe_block: u64) {
        let previous = self.safe_watermark();
        if let Some(previous) = previous.filter(|&p| p > latest_safe_block) {
            warn!(
                previous = previous,
                reported = latest_safe_block,
                "node reported a lower finalized block"
            );
        }

        self.latest_safe_block.store(latest_safe_block, Ordering::Release);
        self.observed.store(true, Ordering::Release);
        self.last_update.store(current_unix_timestamp(), Ordering::Release);
        trace!(block = latest_safe_block, "finality watermark updated");
    }

    /// Returns the number of seconds since the last successful update, or `None` if never set.
    #[must_use]
    pub fn age_seconds(&self) -> Option<u64> {
        if !self.observed.load(Ordering::Acquire) {
            return None;
        }
        let last_update = self.last_update.load(Ordering::Acquire);
        Some(current_unix_timestamp().saturating_sub(last_update))
    }
}
