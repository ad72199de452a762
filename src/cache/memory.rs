//! In-memory tier store.

use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::storage::{EntryInfo, TierStore};
use crate::request::{CachedResponse, RequestKey};

type Tiers = HashMap<String, Vec<(RequestKey, CachedResponse)>>;

/// Non-durable store with the same ordering semantics as `SqliteStorage`.
///
/// Each tier is a vector kept in insertion order. An optional per-tier quota
/// makes `put` fail once reached, standing in for an exhausted medium.
#[derive(Default)]
pub struct MemoryStorage {
  tiers: Mutex<Tiers>,
  quota: Option<usize>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }

  /// Reject new keys once a tier holds `max_entries`.
  pub fn with_quota(max_entries: usize) -> Self {
    Self {
      tiers: Mutex::default(),
      quota: Some(max_entries),
    }
  }

  fn tiers(&self) -> Result<MutexGuard<'_, Tiers>> {
    self
      .tiers
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl TierStore for MemoryStorage {
  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let tiers = self.tiers()?;
    Ok(
      tiers
        .get(tier)
        .and_then(|entries| entries.iter().find(|(k, _)| k == key))
        .map(|(_, entry)| entry.clone()),
    )
  }

  fn put(&self, tier: &str, key: &RequestKey, entry: &CachedResponse) -> Result<()> {
    let mut tiers = self.tiers()?;

    // A rejected write must not create the tier
    if let Some(quota) = self.quota {
      let held = tiers
        .get(tier)
        .map_or(0, |entries| entries.iter().filter(|(k, _)| k != key).count());
      if held >= quota {
        return Err(eyre!("Quota exceeded for tier {} ({} entries)", tier, quota));
      }
    }

    let entries = tiers.entry(tier.to_string()).or_default();
    entries.retain(|(k, _)| k != key);
    entries.push((key.clone(), entry.clone()));

    Ok(())
  }

  fn delete_keys(&self, tier: &str, keys: &[RequestKey]) -> Result<usize> {
    let mut tiers = self.tiers()?;
    let Some(entries) = tiers.get_mut(tier) else {
      return Ok(0);
    };

    let before = entries.len();
    entries.retain(|(k, _)| !keys.contains(k));
    Ok(before - entries.len())
  }

  fn list_entries(&self, tier: &str) -> Result<Vec<EntryInfo>> {
    let tiers = self.tiers()?;
    Ok(
      tiers
        .get(tier)
        .map(|entries| {
          entries
            .iter()
            .map(|(key, entry)| EntryInfo {
              key: key.clone(),
              stored_at: entry.stored_at,
            })
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  fn delete_tier(&self, tier: &str) -> Result<bool> {
    Ok(self.tiers()?.remove(tier).is_some())
  }

  fn list_tier_names(&self) -> Result<BTreeSet<String>> {
    Ok(self.tiers()?.keys().cloned().collect())
  }
}
