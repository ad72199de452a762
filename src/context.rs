use std::sync::Arc;

use crate::cache::{TierKind, TierSet, TierSpec, TierStore};

/// Process-wide cache state: the store plus the tiers of the running deployment.
///
/// Owned by the `Worker` and shared with the dispatcher and its background tasks.
pub struct CacheContext<S: TierStore> {
  pub store: Arc<S>,
  pub tiers: TierSet,
}

impl<S: TierStore> CacheContext<S> {
  pub fn new(store: S, tiers: TierSet) -> Self {
    Self {
      store: Arc::new(store),
      tiers,
    }
  }

  pub fn tier(&self, kind: TierKind) -> &TierSpec {
    self.tiers.get(kind)
  }
}
