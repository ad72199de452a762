//! Tier store trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use crate::request::{CachedResponse, RequestKey, Response};

/// Key and write time of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
  pub key: RequestKey,
  pub stored_at: DateTime<Utc>,
}

/// Durable, tier-scoped key/response storage.
///
/// Operations on one tier are linearizable; tiers never interfere with each
/// other. Tiers come into existence on their first `put`.
pub trait TierStore: Send + Sync {
  /// Look up a single entry.
  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CachedResponse>>;

  /// Store an entry. Re-putting a key moves it to the newest position.
  fn put(&self, tier: &str, key: &RequestKey, entry: &CachedResponse) -> Result<()>;

  /// Remove the given keys, returning how many were present.
  fn delete_keys(&self, tier: &str, keys: &[RequestKey]) -> Result<usize>;

  /// Entries of a tier, oldest-inserted first.
  fn list_entries(&self, tier: &str) -> Result<Vec<EntryInfo>>;

  /// Keys of a tier, oldest-inserted first.
  fn list_keys(&self, tier: &str) -> Result<Vec<RequestKey>> {
    Ok(
      self
        .list_entries(tier)?
        .into_iter()
        .map(|info| info.key)
        .collect(),
    )
  }

  /// Drop a tier and everything in it. Returns false if it did not exist.
  fn delete_tier(&self, tier: &str) -> Result<bool>;

  /// Names of every tier currently persisted.
  fn list_tier_names(&self) -> Result<BTreeSet<String>>;
}

/// SQLite-based tier storage.
pub struct SqliteStorage {
  conn: Mutex<Connection>,
}

impl SqliteStorage {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Non-durable store, for tests and dry runs.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;

    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("mapstash").join("cache.db"))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Run database migrations for cache tables.
  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tiers (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- seq only grows, so ORDER BY seq is insertion order
CREATE TABLE IF NOT EXISTS entries (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tier TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    request_key TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    url TEXT NOT NULL,
    redirected INTEGER NOT NULL,
    stored_at TEXT NOT NULL,
    UNIQUE (tier, key_hash)
);

CREATE INDEX IF NOT EXISTS idx_entries_tier_seq ON entries(tier, seq);
"#;

impl TierStore for SqliteStorage {
  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare(
        "SELECT status, headers, body, url, redirected, stored_at FROM entries
         WHERE tier = ? AND key_hash = ?",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let row: Option<(u16, String, Vec<u8>, String, bool, String)> = stmt
      .query_row(params![tier, key.digest()], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
        ))
      })
      .optional()
      .map_err(|e| eyre!("Failed to read entry {} from {}: {}", key, tier, e))?;

    let Some((status, headers, body, url, redirected, stored_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| eyre!("Failed to deserialize headers for {}: {}", key, e))?;
    let url = Url::parse(&url).map_err(|e| eyre!("Invalid stored url '{}': {}", url, e))?;

    Ok(Some(CachedResponse {
      response: Response {
        status,
        headers,
        body,
        url,
        redirected,
      },
      stored_at: parse_datetime(&stored_at)?,
    }))
  }

  fn put(&self, tier: &str, key: &RequestKey, entry: &CachedResponse) -> Result<()> {
    let conn = self.conn()?;
    let headers = serde_json::to_string(&entry.response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR IGNORE INTO tiers (name) VALUES (?)",
      params![tier],
    )
    .map_err(|e| eyre!("Failed to create tier {}: {}", tier, e))?;

    // REPLACE deletes the old row, so the entry gets a fresh seq
    tx.execute(
      "INSERT OR REPLACE INTO entries
         (tier, key_hash, request_key, status, headers, body, url, redirected, stored_at)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
      params![
        tier,
        key.digest(),
        key.as_str(),
        entry.response.status,
        headers,
        entry.response.body,
        entry.response.url.as_str(),
        entry.response.redirected,
        entry.stored_at.to_rfc3339(),
      ],
    )
    .map_err(|e| eyre!("Failed to store entry {} in {}: {}", key, tier, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn delete_keys(&self, tier: &str, keys: &[RequestKey]) -> Result<usize> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let mut deleted = 0;
    {
      let mut stmt = tx
        .prepare("DELETE FROM entries WHERE tier = ? AND key_hash = ?")
        .map_err(|e| eyre!("Failed to prepare delete: {}", e))?;
      for key in keys {
        deleted += stmt
          .execute(params![tier, key.digest()])
          .map_err(|e| eyre!("Failed to delete {} from {}: {}", key, tier, e))?;
      }
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(deleted)
  }

  fn list_entries(&self, tier: &str) -> Result<Vec<EntryInfo>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT request_key, stored_at FROM entries WHERE tier = ? ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<(String, String)> = stmt
      .query_map(params![tier], |row| Ok((row.get(0)?, row.get(1)?)))
      .map_err(|e| eyre!("Failed to list entries of {}: {}", tier, e))?
      .collect::<rusqlite::Result<_>>()
      .map_err(|e| eyre!("Failed to read entry row of {}: {}", tier, e))?;

    rows
      .into_iter()
      .map(|(key, stored_at)| {
        Ok(EntryInfo {
          key: RequestKey::from_stored(key),
          stored_at: parse_datetime(&stored_at)?,
        })
      })
      .collect()
  }

  fn delete_tier(&self, tier: &str) -> Result<bool> {
    let conn = self.conn()?;
    let tx = conn
      .unchecked_transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM entries WHERE tier = ?", params![tier])
      .map_err(|e| eyre!("Failed to delete entries of {}: {}", tier, e))?;
    let removed = tx
      .execute("DELETE FROM tiers WHERE name = ?", params![tier])
      .map_err(|e| eyre!("Failed to delete tier {}: {}", tier, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn list_tier_names(&self) -> Result<BTreeSet<String>> {
    let conn = self.conn()?;

    let mut stmt = conn
      .prepare("SELECT name FROM tiers")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list tiers: {}", e))?
      .collect::<rusqlite::Result<BTreeSet<String>>>()
      .map_err(|e| eyre!("Failed to read tier row: {}", e))?;

    Ok(names)
  }
}

/// Parse an RFC 3339 timestamp as written by `put`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn key(path: &str) -> RequestKey {
    RequestKey::new("GET", &Url::parse(&format!("https://tiles.example.com/{}", path)).unwrap())
  }

  fn entry(body: &str) -> CachedResponse {
    CachedResponse::now(Response {
      status: 200,
      headers: vec![("content-type".into(), "image/png".into())],
      body: body.as_bytes().to_vec(),
      url: Url::parse("https://tiles.example.com/t.png").unwrap(),
      redirected: false,
    })
  }

  #[test]
  fn test_put_then_get_round_trips() {
    let store = SqliteStorage::open_in_memory().unwrap();
    let e = entry("tile");
    store.put("tile-v1", &key("a"), &e).unwrap();

    let got = store.get("tile-v1", &key("a")).unwrap().unwrap();
    assert_eq!(got.response, e.response);
    assert_eq!(got.stored_at.timestamp_micros(), e.stored_at.timestamp_micros());
  }

  #[test]
  fn test_get_missing_is_none() {
    let store = SqliteStorage::open_in_memory().unwrap();
    assert!(store.get("tile-v1", &key("a")).unwrap().is_none());
  }

  #[test]
  fn test_tiers_are_isolated() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.put("tile-v1", &key("a"), &entry("one")).unwrap();
    store.put("font-v1", &key("a"), &entry("two")).unwrap();

    assert_eq!(store.get("tile-v1", &key("a")).unwrap().unwrap().response.body, b"one");
    assert_eq!(store.get("font-v1", &key("a")).unwrap().unwrap().response.body, b"two");

    store.delete_tier("font-v1").unwrap();
    assert!(store.get("tile-v1", &key("a")).unwrap().is_some());
  }

  #[test]
  fn test_list_keys_is_insertion_ordered() {
    let store = SqliteStorage::open_in_memory().unwrap();
    for k in ["c", "a", "b"] {
      store.put("tile-v1", &key(k), &entry(k)).unwrap();
    }
    assert_eq!(
      store.list_keys("tile-v1").unwrap(),
      vec![key("c"), key("a"), key("b")]
    );
  }

  #[test]
  fn test_reput_moves_key_to_newest() {
    let store = SqliteStorage::open_in_memory().unwrap();
    for k in ["a", "b", "c"] {
      store.put("tile-v1", &key(k), &entry(k)).unwrap();
    }
    store.put("tile-v1", &key("a"), &entry("a2")).unwrap();

    assert_eq!(
      store.list_keys("tile-v1").unwrap(),
      vec![key("b"), key("c"), key("a")]
    );
    assert_eq!(store.get("tile-v1", &key("a")).unwrap().unwrap().response.body, b"a2");
  }

  #[test]
  fn test_delete_keys_counts_present_only() {
    let store = SqliteStorage::open_in_memory().unwrap();
    store.put("tile-v1", &key("a"), &entry("a")).unwrap();
    store.put("tile-v1", &key("b"), &entry("b")).unwrap();

    let deleted = store.delete_keys("tile-v1", &[key("a"), key("zzz")]).unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(store.list_keys("tile-v1").unwrap(), vec![key("b")]);
  }

  #[test]
  fn test_tier_created_on_first_put_and_deleted_whole() {
    let store = SqliteStorage::open_in_memory().unwrap();
    assert!(store.list_tier_names().unwrap().is_empty());

    store.put("shell-v1", &key("index"), &entry("html")).unwrap();
    store.put("tile-v1", &key("a"), &entry("a")).unwrap();
    assert_eq!(
      store.list_tier_names().unwrap(),
      ["shell-v1", "tile-v1"].into_iter().map(String::from).collect()
    );

    assert!(store.delete_tier("shell-v1").unwrap());
    assert!(!store.delete_tier("shell-v1").unwrap());
    assert!(store.list_keys("shell-v1").unwrap().is_empty());
    assert_eq!(
      store.list_tier_names().unwrap(),
      ["tile-v1"].into_iter().map(String::from).collect()
    );
  }

  #[test]
  fn test_open_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStorage::open(&path).unwrap();
      store.put("tile-v1", &key("a"), &entry("a")).unwrap();
    }

    let store = SqliteStorage::open(&path).unwrap();
    assert_eq!(store.list_keys("tile-v1").unwrap(), vec![key("a")]);
  }
}
