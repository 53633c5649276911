//! In-memory public-key cache with HTTP freshness, single-flight refresh, and stale serving.

pub mod entry;
pub mod manager;
pub mod state;

pub use manager::{CacheSnapshot, KeyCache, KeyCacheStatus};
