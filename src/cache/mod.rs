//! Versioned, count-bounded response cache.
//!
//! This module provides the storage side of the agent:
//! - Named generations of GET response snapshots, persisted in SQLite
//! - Insertion-ordered entries with oldest-first eviction
//! - A per-generation write lock so concurrent writers keep the count bound

mod eviction;
mod layer;
mod storage;
mod traits;

pub use eviction::EvictionPolicy;
pub use layer::CacheGeneration;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{CacheSource, CachedEntry, RequestKey};
