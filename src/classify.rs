//! Host-based request classification.

use std::collections::BTreeSet;

/// Which tier (if any) a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
  /// Same-origin application asset. Only the dispatcher assigns this.
  Shell,
  Tile,
  Font,
  /// Cross-origin and not on any allow-list: never cached
  Unclassified,
}

/// Maps a request host to a cross-origin class using two allow-lists.
///
/// A pattern matches a host exactly or as a dot-separated suffix, so
/// `cartocdn.com` covers `a.basemaps.cartocdn.com` but not `evilcartocdn.com`.
/// A leading `*.` or `.` on a pattern is accepted and ignored.
#[derive(Debug, Clone, Default)]
pub struct DomainClassifier {
  tile_domains: BTreeSet<String>,
  font_domains: BTreeSet<String>,
}

impl DomainClassifier {
  pub fn new<T, F>(tile_domains: T, font_domains: F) -> Self
  where
    T: IntoIterator,
    T::Item: AsRef<str>,
    F: IntoIterator,
    F::Item: AsRef<str>,
  {
    Self {
      tile_domains: normalize_patterns(tile_domains),
      font_domains: normalize_patterns(font_domains),
    }
  }

  /// Classify a bare hostname. Tile patterns win over font patterns.
  pub fn classify(&self, host: &str) -> RequestClass {
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    if matches_any(&host, &self.tile_domains) {
      RequestClass::Tile
    } else if matches_any(&host, &self.font_domains) {
      RequestClass::Font
    } else {
      RequestClass::Unclassified
    }
  }
}

fn normalize_patterns<I>(patterns: I) -> BTreeSet<String>
where
  I: IntoIterator,
  I::Item: AsRef<str>,
{
  patterns
    .into_iter()
    .map(|p| {
      p.as_ref()
        .trim()
        .trim_start_matches("*.")
        .trim_start_matches('.')
        .trim_end_matches('.')
        .to_ascii_lowercase()
    })
    .filter(|p| !p.is_empty())
    .collect()
}

fn matches_any(host: &str, patterns: &BTreeSet<String>) -> bool {
  patterns.iter().any(|pattern| {
    host == pattern
      || (host.len() > pattern.len()
        && host.ends_with(pattern.as_str())
        && host.as_bytes()[host.len() - pattern.len() - 1] == b'.')
  })
}
