//! Tier model: the three cache partitions and their policies.

use chrono::Duration;
use std::collections::BTreeSet;
use std::fmt;

use super::eviction::EvictionPolicy;

/// One of the independently managed cache partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TierKind {
  Shell,
  Tile,
  Font,
}

impl TierKind {
  pub const ALL: [TierKind; 3] = [TierKind::Shell, TierKind::Tile, TierKind::Font];

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Shell => "shell",
      Self::Tile => "tile",
      Self::Font => "font",
    }
  }

  /// Versioned tier name, e.g. `shell-v2`.
  pub fn versioned_name(&self, version: u32) -> String {
    format!("{}-v{}", self.as_str(), version)
  }
}

impl fmt::Display for TierKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How a tier answers a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
  CacheFirst,
  StaleWhileRevalidate,
  /// Network, falling back to the tier when the network fails
  NetworkFirst,
}

/// A tier as configured for the running deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSpec {
  pub kind: TierKind,
  pub name: String,
  /// Max entry count; `None` means unbounded
  pub capacity: Option<usize>,
  /// Entries older than this are evicted regardless of count
  pub max_age: Option<Duration>,
  pub strategy: Strategy,
}

impl TierSpec {
  /// Only bounded tiers auto-evict individual entries.
  pub fn eviction_policy(&self) -> Option<EvictionPolicy> {
    self
      .capacity
      .map(|capacity| EvictionPolicy::new(capacity).with_max_age(self.max_age))
  }
}

/// Version tags for each tier. Bump one to retire that tier's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierVersions {
  pub shell: u32,
  pub tile: u32,
  pub font: u32,
}

impl Default for TierVersions {
  fn default() -> Self {
    Self {
      shell: 1,
      tile: 1,
      font: 1,
    }
  }
}

/// The current deployment's tiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSet {
  pub shell: TierSpec,
  pub tile: TierSpec,
  pub font: TierSpec,
}

impl TierSet {
  pub fn new(versions: TierVersions, tile_capacity: usize, tile_max_age: Option<Duration>) -> Self {
    Self {
      shell: TierSpec {
        kind: TierKind::Shell,
        name: TierKind::Shell.versioned_name(versions.shell),
        capacity: None,
        max_age: None,
        strategy: Strategy::CacheFirst,
      },
      tile: TierSpec {
        kind: TierKind::Tile,
        name: TierKind::Tile.versioned_name(versions.tile),
        capacity: Some(tile_capacity),
        max_age: tile_max_age,
        strategy: Strategy::StaleWhileRevalidate,
      },
      font: TierSpec {
        kind: TierKind::Font,
        name: TierKind::Font.versioned_name(versions.font),
        capacity: None,
        max_age: None,
        strategy: Strategy::CacheFirst,
      },
    }
  }

  pub fn get(&self, kind: TierKind) -> &TierSpec {
    match kind {
      TierKind::Shell => &self.shell,
      TierKind::Tile => &self.tile,
      TierKind::Font => &self.font,
    }
  }

  /// Names that survive activation.
  pub fn expected_names(&self) -> BTreeSet<String> {
    TierKind::ALL
      .iter()
      .map(|kind| self.get(*kind).name.clone())
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_versioned_names() {
    let set = TierSet::new(
      TierVersions {
        shell: 2,
        tile: 1,
        font: 1,
      },
      100,
      None,
    );
    assert_eq!(set.shell.name, "shell-v2");
    assert_eq!(set.tile.name, "tile-v1");
    assert_eq!(set.font.name, "font-v1");
    assert_eq!(
      set.expected_names(),
      ["font-v1", "shell-v2", "tile-v1"]
        .into_iter()
        .map(String::from)
        .collect()
    );
  }

  #[test]
  fn test_only_tile_is_bounded() {
    let set = TierSet::new(TierVersions::default(), 42, Some(Duration::days(30)));
    assert_eq!(set.shell.eviction_policy(), None);
    assert_eq!(set.font.eviction_policy(), None);
    assert_eq!(
      set.tile.eviction_policy(),
      Some(EvictionPolicy::new(42).with_max_age(Some(Duration::days(30))))
    );
    assert_eq!(set.tile.strategy, Strategy::StaleWhileRevalidate);
    assert_eq!(set.get(TierKind::Font).strategy, Strategy::CacheFirst);
  }
}
