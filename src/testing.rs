//! Scripted fetcher for dispatcher and lifecycle tests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::cache::{EntryInfo, MemoryStorage, TierStore};
use crate::error::FetchError;
use crate::fetch::Fetcher;
use crate::request::{CachedResponse, Request, RequestKey, Response};

#[derive(Clone)]
enum Script {
  Respond { status: u16, body: Vec<u8> },
  Redirect { to: Url, body: Vec<u8> },
  Fail,
  Hang,
}

/// Answers each URL the way it was told to; unknown URLs fail.
#[derive(Default)]
pub struct FakeFetcher {
  scripts: Mutex<HashMap<String, Script>>,
  calls: Mutex<HashMap<String, usize>>,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  fn set(&self, url: &str, script: Script) {
    self.scripts.lock().unwrap().insert(url.to_string(), script);
  }

  pub fn respond(&self, url: &str, status: u16, body: &str) {
    self.set(
      url,
      Script::Respond {
        status,
        body: body.as_bytes().to_vec(),
      },
    );
  }

  pub fn redirect(&self, url: &str, to: &str, body: &str) {
    self.set(
      url,
      Script::Redirect {
        to: Url::parse(to).unwrap(),
        body: body.as_bytes().to_vec(),
      },
    );
  }

  pub fn fail(&self, url: &str) {
    self.set(url, Script::Fail);
  }

  /// Never answer; the future stays pending.
  pub fn hang(&self, url: &str) {
    self.set(url, Script::Hang);
  }

  pub fn calls(&self, url: &str) -> usize {
    self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
  }
}

#[async_trait]
impl Fetcher for FakeFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let url = request.url.to_string();
    *self.calls.lock().unwrap().entry(url.clone()).or_default() += 1;
    let script = self.scripts.lock().unwrap().get(&url).cloned();

    match script {
      Some(Script::Respond { status, body }) => Ok(Response {
        status,
        headers: vec![("content-type".into(), "application/octet-stream".into())],
        body,
        url: request.url.clone(),
        redirected: false,
      }),
      Some(Script::Redirect { to, body }) => Ok(Response {
        status: 200,
        headers: Vec::new(),
        body,
        url: to,
        redirected: true,
      }),
      Some(Script::Hang) => std::future::pending().await,
      Some(Script::Fail) | None => Err(FetchError::Transport {
        url,
        message: "connection refused".to_string(),
      }),
    }
  }
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: Fn() -> bool>(check: F) -> bool {
  for _ in 0..100 {
    if check() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(10)).await;
  }
  check()
}

/// Memory store whose reads or eviction calls can be switched to fail.
///
/// Writes always go through. `sweep_attempts` counts `list_entries` calls,
/// the first thing every sweep does.
#[derive(Default)]
pub struct FlakyStore {
  pub inner: MemoryStorage,
  fail_reads: AtomicBool,
  fail_sweeps: AtomicBool,
  sweep_attempts: AtomicUsize,
}

impl FlakyStore {
  pub fn failing_reads() -> Self {
    let store = Self::default();
    store.fail_reads.store(true, Ordering::SeqCst);
    store
  }

  pub fn failing_sweeps() -> Self {
    let store = Self::default();
    store.fail_sweeps.store(true, Ordering::SeqCst);
    store
  }

  pub fn sweep_attempts(&self) -> usize {
    self.sweep_attempts.load(Ordering::SeqCst)
  }
}

impl TierStore for FlakyStore {
  fn get(&self, tier: &str, key: &RequestKey) -> Result<Option<CachedResponse>> {
    if self.fail_reads.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error reading {}", tier));
    }
    self.inner.get(tier, key)
  }

  fn put(&self, tier: &str, key: &RequestKey, entry: &CachedResponse) -> Result<()> {
    self.inner.put(tier, key, entry)
  }

  fn delete_keys(&self, tier: &str, keys: &[RequestKey]) -> Result<usize> {
    if self.fail_sweeps.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error deleting from {}", tier));
    }
    self.inner.delete_keys(tier, keys)
  }

  fn list_entries(&self, tier: &str) -> Result<Vec<EntryInfo>> {
    self.sweep_attempts.fetch_add(1, Ordering::SeqCst);
    if self.fail_sweeps.load(Ordering::SeqCst) {
      return Err(eyre!("disk I/O error listing {}", tier));
    }
    self.inner.list_entries(tier)
  }

  fn delete_tier(&self, tier: &str) -> Result<bool> {
    self.inner.delete_tier(tier)
  }

  fn list_tier_names(&self) -> Result<BTreeSet<String>> {
    self.inner.list_tier_names()
  }
}
