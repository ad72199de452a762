use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{SqliteStorage, TierSet, TierVersions};
use crate::classify::DomainClassifier;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// The application's own origin; requests to it go to the shell tier
  pub origin: String,
  /// Assets seeded into the shell tier at install, absolute or origin-relative
  #[serde(default = "default_shell_manifest")]
  pub shell_manifest: Vec<String>,
  #[serde(default)]
  pub tiles: TilesConfig,
  #[serde(default)]
  pub fonts: FontsConfig,
  #[serde(default)]
  pub versions: VersionsConfig,
  /// SQLite database location (defaults to $XDG_DATA_HOME/mapstash/cache.db)
  pub store_path: Option<PathBuf>,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TilesConfig {
  /// Tile provider host patterns (case-insensitive)
  #[serde(
    default = "default_tile_domains",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub domains: BTreeSet<String>,
  #[serde(default = "default_tile_capacity")]
  pub capacity: usize,
  /// `null` disables age-based eviction
  #[serde(default = "default_tile_max_age_days")]
  pub max_age_days: Option<u64>,
}

impl Default for TilesConfig {
  fn default() -> Self {
    Self {
      domains: default_tile_domains(),
      capacity: default_tile_capacity(),
      max_age_days: default_tile_max_age_days(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FontsConfig {
  /// Web font host patterns (case-insensitive)
  #[serde(
    default = "default_font_domains",
    deserialize_with = "deserialize_lowercase_set"
  )]
  pub domains: BTreeSet<String>,
}

impl Default for FontsConfig {
  fn default() -> Self {
    Self {
      domains: default_font_domains(),
    }
  }
}

/// Version tag per tier. Bumping one retires that tier at the next activation.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VersionsConfig {
  #[serde(default = "default_version")]
  pub shell: u32,
  #[serde(default = "default_version")]
  pub tile: u32,
  #[serde(default = "default_version")]
  pub font: u32,
}

impl Default for VersionsConfig {
  fn default() -> Self {
    Self {
      shell: default_version(),
      tile: default_version(),
      font: default_version(),
    }
  }
}

fn default_shell_manifest() -> Vec<String> {
  ["/", "/index.html", "/data/historical-snapshots.json"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_tile_domains() -> BTreeSet<String> {
  ["basemaps.cartocdn.com", "tile.openstreetmap.org"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_font_domains() -> BTreeSet<String> {
  ["fonts.googleapis.com", "fonts.gstatic.com"]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_tile_capacity() -> usize {
  500
}

fn default_tile_max_age_days() -> Option<u64> {
  Some(30)
}

fn default_version() -> u32 {
  1
}

fn default_request_timeout_secs() -> u64 {
  30
}

fn deserialize_lowercase_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.to_lowercase()).collect())
}

impl Config {
  /// Configuration with every default applied, for the given origin.
  pub fn for_origin(origin: &str) -> Self {
    Self {
      origin: origin.to_string(),
      shell_manifest: default_shell_manifest(),
      tiles: TilesConfig::default(),
      fonts: FontsConfig::default(),
      versions: VersionsConfig::default(),
      store_path: None,
      request_timeout_secs: default_request_timeout_secs(),
    }
  }

  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./mapstash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/mapstash/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/mapstash/config.yaml\n\
                 See mapstash.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("mapstash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("mapstash").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Check everything that can be checked without touching the network.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;
    self.manifest_urls()?;

    if self.tiles.capacity == 0 {
      return Err(eyre!("tiles.capacity must be at least 1"));
    }

    if self.request_timeout_secs == 0 {
      return Err(eyre!("request_timeout_secs must be at least 1"));
    }

    self.tile_max_age()?;

    Ok(())
  }

  /// Age bound for the tile tier, `None` when disabled.
  pub fn tile_max_age(&self) -> Result<Option<Duration>> {
    let Some(days) = self.tiles.max_age_days else {
      return Ok(None);
    };

    if days == 0 {
      return Err(eyre!("tiles.max_age_days must be at least 1 (use null to disable)"));
    }

    i64::try_from(days)
      .ok()
      .and_then(Duration::try_days)
      .map(Some)
      .ok_or_else(|| eyre!("tiles.max_age_days is out of range: {}", days))
  }

  pub fn origin_url(&self) -> Result<Url> {
    let url =
      Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
      return Err(eyre!("Origin must be an http(s) URL, got '{}'", self.origin));
    }

    Ok(url)
  }

  /// Manifest entries resolved against the origin. Every one must stay on it.
  pub fn manifest_urls(&self) -> Result<Vec<Url>> {
    let origin = self.origin_url()?;

    self
      .shell_manifest
      .iter()
      .map(|entry| {
        let url = origin
          .join(entry)
          .map_err(|e| eyre!("Invalid manifest entry '{}': {}", entry, e))?;
        if url.origin() != origin.origin() {
          return Err(eyre!(
            "Manifest entry '{}' is not on origin {}",
            entry,
            self.origin
          ));
        }
        Ok(url)
      })
      .collect()
  }

  pub fn tier_set(&self) -> Result<TierSet> {
    let versions = TierVersions {
      shell: self.versions.shell,
      tile: self.versions.tile,
      font: self.versions.font,
    };
    Ok(TierSet::new(versions, self.tiles.capacity, self.tile_max_age()?))
  }

  pub fn classifier(&self) -> DomainClassifier {
    DomainClassifier::new(&self.tiles.domains, &self.fonts.domains)
  }

  pub fn store_path(&self) -> Result<PathBuf> {
    match &self.store_path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }

  pub fn request_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.request_timeout_secs)
  }
}
