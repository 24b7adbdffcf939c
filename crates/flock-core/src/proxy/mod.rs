//! Proxy module for JSON-RPC request processing.
//!
//! # Main Components
//!
//! - [`normalize`]: turns an inbound body into ordered requests plus the reply [`Framing`]
//! - [`Dispatcher`]: serves finalized block lookups from cache and forwards the rest as one
//!   upstream batch
//! - [`ProxyError`] / [`NormalizeError`]: batch-level failures
//!
//! # Request Processing Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌─────────────┐
//! │  normalize  │ ─── Invalid payload ──► single error object
//! └──────┬──────┘
//!        │ requests (rejected elements set aside by position)
//!        ▼
//! ┌─────────────────┐
//! │   Dispatcher    │
//! └────────┬────────┘
//!          │ per request
//!    ┌─────┴──────────────┐
//!    ▼                    ▼
//!  block lookup        anything else
//!    │                    │
//!  Cache ── hit ──────────┼──────────────────┐
//!    │ miss               │                  │
//!    ▼                    ▼                  │
//!  ┌────────────────────────────┐            │
//!  │  one upstream batch call   │ ── transport failure ──► -69 error object
//!  └──────────────┬─────────────┘            │
//!                 │ match by id,             │
//!                 │ write back final blocks  │
//!                 ▼                          ▼
//!        responses in request order ──► Framing::render
//! ```

pub mod dispatcher;
pub mod errors;
pub mod normalize;

pub use dispatcher::{CacheWrite, Dispatcher, MISSING_RESPONSE_MESSAGE};
pub use errors::{NormalizeError, ProxyError};
pub use normalize::{normalize, qualify, Framing, Normalized};
