//! Tiered response cache.
//!
//! This module provides the storage side of the cache:
//! - Three independently versioned tiers (shell, tile, font)
//! - A durable SQLite store and an in-memory store with identical semantics
//! - Insertion-ordered keys, so eviction can drop the oldest entries first
//! - Count- and age-bounded eviction for the tile tier

mod eviction;
mod memory;
mod storage;
mod tier;
mod traits;

pub use eviction::{
  select_expired, select_for_eviction, sweep, EvictionPolicy, EvictionReport,
};
pub use memory::MemoryStorage;
pub use storage::{EntryInfo, SqliteStorage, TierStore};
pub use tier::{Strategy, TierKind, TierSet, TierSpec, TierVersions};
pub use traits::{Served, ServedFrom};
