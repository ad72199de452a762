//! Size- and age-bounded eviction for the tile tier.
//!
//! Two passes decide what goes:
//! - count: once a tier holds more than `capacity` entries, the oldest-inserted
//!   ones are removed until `capacity` remain (FIFO)
//! - age: when `max_age` is set, every entry stored longer ago than that is
//!   removed regardless of count
//!
//! Selection is pure; `sweep` applies it to a store.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use std::collections::HashSet;
use tracing::debug;

use super::storage::{EntryInfo, TierStore};
use crate::request::RequestKey;

/// Keys to drop so that at most `capacity` remain, oldest first.
pub fn select_for_eviction(ordered_keys: &[RequestKey], capacity: usize) -> Vec<RequestKey> {
  if ordered_keys.len() <= capacity {
    return Vec::new();
  }
  ordered_keys[..ordered_keys.len() - capacity].to_vec()
}

/// Keys whose entries were stored more than `max_age` before `now`.
pub fn select_expired(
  entries: &[EntryInfo],
  max_age: Duration,
  now: DateTime<Utc>,
) -> Vec<RequestKey> {
  entries
    .iter()
    .filter(|info| now - info.stored_at > max_age)
    .map(|info| info.key.clone())
    .collect()
}

/// Bounds applied to a tier after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
  pub capacity: usize,
  pub max_age: Option<Duration>,
}

impl EvictionPolicy {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity,
      max_age: None,
    }
  }

  pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
    self.max_age = max_age;
    self
  }

  /// Union of both passes, in insertion order, without duplicates.
  pub fn select(&self, entries: &[EntryInfo], now: DateTime<Utc>) -> Vec<RequestKey> {
    let keys: Vec<RequestKey> = entries.iter().map(|info| info.key.clone()).collect();
    let mut doomed: HashSet<RequestKey> = select_for_eviction(&keys, self.capacity)
      .into_iter()
      .collect();

    if let Some(max_age) = self.max_age {
      doomed.extend(select_expired(entries, max_age, now));
    }

    keys.into_iter().filter(|k| doomed.contains(k)).collect()
  }
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
  /// Entries in the tier before the sweep
  pub entries_before: usize,
  /// Entries actually removed
  pub evicted: usize,
}

/// Evict from `tier` according to `policy`.
pub fn sweep<S: TierStore + ?Sized>(
  store: &S,
  tier: &str,
  policy: &EvictionPolicy,
) -> Result<EvictionReport> {
  let entries = store.list_entries(tier)?;
  let doomed = policy.select(&entries, Utc::now());

  let evicted = if doomed.is_empty() {
    0
  } else {
    store.delete_keys(tier, &doomed)?
  };

  debug!(
    tier,
    entries_before = entries.len(),
    evicted,
    capacity = policy.capacity,
    "Eviction sweep complete"
  );

  Ok(EvictionReport {
    entries_before: entries.len(),
    evicted,
  })
}
