//! prospect-search: the synchronization-and-query subsystem between a
//! relational prospect/company store and a denormalized search index.
//!
//! Relational writes flow through the change-capture listener (or the
//! periodic denormalization refresher) into the index via an idempotent,
//! last-writer-wins document writer; client filter requests compile into
//! typed index queries and are served through a TTL-bounded result cache.
//! Consistency is eventual: results are correct as of some point within
//! the last sync-lag + cache-TTL window.

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod search;
pub mod state;
pub mod sync;
