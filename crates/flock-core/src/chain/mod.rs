//! Finality tracking.
//!
//! ```text
//!   ┌──────────────────┐   GET status    ┌──────────┐
//!   │ FinalityTracker  │ ──────────────► │   node   │
//!   │ (only writer)    │ ◄────────────── │          │
//!   └────────┬─────────┘ lastVerified... └──────────┘
//!            │ update()
//!            ▼
//!   ┌──────────────────┐
//!   │  FinalityState   │  Arc<FinalityState>, lock-free reads
//!   └────────┬─────────┘
//!            │ safe_watermark()
//!     ┌──────┴───────────────┐
//!     ▼                      ▼
//!  Dispatcher        BackfillSynchronizer
//! ```
//!
//! Until the first successful poll the watermark is unset and no block is cacheable.

pub mod state;
pub mod tracker;

pub use state::FinalityState;
pub use tracker::FinalityTracker;
