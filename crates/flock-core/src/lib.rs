//! Core of the flock caching JSON-RPC proxy.
//!
//! flock sits in front of a node's JSON-RPC endpoint and answers block-info lookups for
//! finalized blocks from a local redb store. Everything else is forwarded untouched.
//!
//! # Modules
//!
//! - [`store`]: durable key-value store (redb)
//! - [`cache`]: typed keys over the store
//! - [`chain`]: finality watermark and the tracker that polls it
//! - [`proxy`]: payload normalization and the dispatcher that splits batches between cache and
//!   node
//! - [`sync`]: backfill of finalized blocks from a persisted cursor
//! - [`upstream`]: HTTP client for the node
//! - [`config`], [`metrics`], [`types`]

pub mod cache;
pub mod chain;
pub mod config;
pub mod metrics;
pub mod proxy;
pub mod store;
pub mod sync;
pub mod types;
pub mod upstream;
