//! Install/activate lifecycle around the dispatcher.
//!
//! A `Worker` moves through `Installing -> Activating -> Serving`, never back.
//! Only a serving worker routes requests through the tiers; before that every
//! request goes straight to the network and nothing is stored.

use color_eyre::Result;
use futures::future::{join_all, try_join_all};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{Served, TierStore};
use crate::config::Config;
use crate::context::CacheContext;
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, LifecycleError};
use crate::fetch::Fetcher;
use crate::request::{CachedResponse, Request, RequestKey, Response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  Installing,
  Activating,
  Serving,
}

impl Phase {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Activating => "activating",
      Self::Serving => "serving",
    }
  }
}

/// Owns the cache context for one deployment and drives its lifecycle.
pub struct Worker<S: TierStore, F: Fetcher> {
  context: Arc<CacheContext<S>>,
  fetcher: Arc<F>,
  dispatcher: Dispatcher<S, F>,
  manifest: Vec<Url>,
  phase: Mutex<Phase>,
}

impl<S, F> Worker<S, F>
where
  S: TierStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(config: &Config, store: S, fetcher: F) -> Result<Self> {
    let origin = config.origin_url()?;
    let manifest = config.manifest_urls()?;
    let context = Arc::new(CacheContext::new(store, config.tier_set()?));
    let fetcher = Arc::new(fetcher);
    let dispatcher = Dispatcher::new(
      Arc::clone(&context),
      Arc::clone(&fetcher),
      config.classifier(),
      &origin,
    );

    Ok(Self {
      context,
      fetcher,
      dispatcher,
      manifest,
      phase: Mutex::new(Phase::Installing),
    })
  }

  pub fn phase(&self) -> Phase {
    *self.phase.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn set_phase(&self, next: Phase) {
    let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
    info!(from = phase.as_str(), to = next.as_str(), "Worker phase change");
    *phase = next;
  }

  fn expect_phase(&self, expected: Phase, action: &'static str) -> Result<(), LifecycleError> {
    let phase = self.phase();
    if phase != expected {
      return Err(LifecycleError::InvalidPhase {
        action,
        phase: phase.as_str(),
      });
    }
    Ok(())
  }

  pub fn context(&self) -> &CacheContext<S> {
    &self.context
  }

  pub fn dispatcher(&self) -> &Dispatcher<S, F> {
    &self.dispatcher
  }

  /// Seed the shell tier with the manifest, all or nothing.
  ///
  /// Every asset is fetched before anything is written. If any fetch fails or
  /// answers with a non-success status, nothing is stored. If a write fails
  /// midway, the shell tier is removed again.
  pub async fn install(&self) -> Result<(), LifecycleError> {
    self.expect_phase(Phase::Installing, "install")?;
    let shell = &self.context.tiers.shell;
    info!(tier = %shell.name, assets = self.manifest.len(), "Installing shell tier");

    let fetched: Vec<(RequestKey, Response)> =
      try_join_all(self.manifest.iter().map(|url| self.fetch_manifest_asset(url))).await?;

    for (key, response) in &fetched {
      let entry = CachedResponse::now(response.clone());
      if let Err(e) = self.context.store.put(&shell.name, key, &entry) {
        if let Err(cleanup) = self.context.store.delete_tier(&shell.name) {
          warn!(tier = %shell.name, error = %cleanup, "Failed to remove partial shell tier");
        }
        return Err(LifecycleError::ShellWrite {
          tier: shell.name.clone(),
          message: e.to_string(),
        });
      }
    }

    self.set_phase(Phase::Activating);
    Ok(())
  }

  async fn fetch_manifest_asset(
    &self,
    url: &Url,
  ) -> Result<(RequestKey, Response), LifecycleError> {
    let request = Request::get(url.clone());
    let response =
      self
        .fetcher
        .fetch(&request)
        .await
        .map_err(|source| LifecycleError::ManifestFetch {
          url: url.to_string(),
          source,
        })?;

    if !response.is_cacheable() {
      return Err(LifecycleError::ManifestStatus {
        url: url.to_string(),
        status: response.status,
      });
    }

    debug!(%url, bytes = response.body.len(), "Fetched shell asset");
    Ok((request.key(), response))
  }

  /// Delete every persisted tier this deployment does not use, then start
  /// serving. Returns the deleted tier names.
  pub async fn activate(&self) -> Result<Vec<String>, LifecycleError> {
    self.expect_phase(Phase::Activating, "activate")?;

    let expected = self.context.tiers.expected_names();
    let persisted = self
      .context
      .store
      .list_tier_names()
      .map_err(|e| LifecycleError::Store(e.to_string()))?;

    let stale: Vec<String> = persisted.difference(&expected).cloned().collect();
    for name in &stale {
      self
        .context
        .store
        .delete_tier(name)
        .map_err(|e| LifecycleError::Store(e.to_string()))?;
      info!(tier = %name, "Deleted stale tier");
    }

    self.set_phase(Phase::Serving);
    Ok(stale)
  }

  /// True if this deployment's shell tier was seeded by an earlier run.
  pub fn is_installed(&self) -> Result<bool> {
    let shell = &self.context.tiers.shell.name;
    Ok(
      self.context.store.list_tier_names()?.contains(shell)
        && !self.context.store.list_keys(shell)?.is_empty(),
    )
  }

  /// Install (unless already installed) and activate straight away.
  /// Returns the tiers deleted by activation.
  pub async fn start(&self) -> Result<Vec<String>, LifecycleError> {
    if self.phase() == Phase::Installing {
      let installed = self
        .is_installed()
        .map_err(|e| LifecycleError::Store(e.to_string()))?;
      if installed {
        info!(tier = %self.context.tiers.shell.name, "Shell tier already installed");
        self.set_phase(Phase::Activating);
      } else {
        self.install().await?;
      }
    }

    if self.phase() == Phase::Activating {
      return self.activate().await;
    }
    Ok(Vec::new())
  }

  /// Answer a request. Until the worker is serving, requests bypass the tiers.
  pub async fn handle(&self, request: Request) -> Result<Served, DispatchError> {
    if self.phase() != Phase::Serving {
      debug!(url = %request.url, phase = self.phase().as_str(), "Not serving yet, passing through");
      return self.dispatcher.passthrough(&request).await;
    }
    self.dispatcher.handle(request).await
  }

  /// Pull a batch of URLs through the tiers ahead of use.
  pub async fn warm(&self, urls: &[Url]) -> Vec<(Url, Result<Served, DispatchError>)> {
    let results = join_all(urls.iter().map(|url| self.handle(Request::get(url.clone())))).await;
    urls.iter().cloned().zip(results).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{MemoryStorage, ServedFrom};
  use crate::testing::FakeFetcher;

  const ORIGIN: &str = "https://saintpaul.example.org";
  const ROOT: &str = "https://saintpaul.example.org/";
  const INDEX: &str = "https://saintpaul.example.org/index.html";
  const SNAPSHOTS: &str = "https://saintpaul.example.org/data/historical-snapshots.json";
  const TILE: &str = "https://a.basemaps.cartocdn.com/dark_all/14/4689/6114.png";

  fn fetcher_with_manifest() -> FakeFetcher {
    let fetcher = FakeFetcher::new();
    fetcher.respond(ROOT, 200, "<html>");
    fetcher.respond(INDEX, 200, "<html>");
    fetcher.respond(SNAPSHOTS, 200, "[]");
    fetcher
  }

  fn worker(
    config: &Config,
    store: MemoryStorage,
    fetcher: FakeFetcher,
  ) -> Worker<MemoryStorage, FakeFetcher> {
    Worker::new(config, store, fetcher).unwrap()
  }

  #[tokio::test]
  async fn test_install_seeds_shell_and_moves_to_activating() {
    let config = Config::for_origin(ORIGIN);
    let w = worker(&config, MemoryStorage::new(), fetcher_with_manifest());

    w.install().await.unwrap();
    assert_eq!(w.phase(), Phase::Activating);
    let keys = w.context().store.list_keys("shell-v1").unwrap();
    assert_eq!(keys.len(), 3);
  }

  #[tokio::test]
  async fn test_install_failure_leaves_no_shell_tier() {
    let config = Config::for_origin(ORIGIN);
    let fetcher = fetcher_with_manifest();
    fetcher.fail(SNAPSHOTS);
    let w = worker(&config, MemoryStorage::new(), fetcher);

    let err = w.install().await.unwrap_err();
    assert!(matches!(err, LifecycleError::ManifestFetch { .. }));
    assert_eq!(w.phase(), Phase::Installing);
    assert!(w.context().store.list_tier_names().unwrap().is_empty());

    let err = w.activate().await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidPhase { .. }));
  }

  #[tokio::test]
  async fn test_install_rejects_error_status() {
    let config = Config::for_origin(ORIGIN);
    let fetcher = fetcher_with_manifest();
    fetcher.respond(INDEX, 404, "missing");
    let w = worker(&config, MemoryStorage::new(), fetcher);

    let err = w.install().await.unwrap_err();
    assert!(matches!(err, LifecycleError::ManifestStatus { status: 404, .. }));
    assert!(w.context().store.list_tier_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_install_write_failure_removes_partial_tier() {
    let config = Config::for_origin(ORIGIN);
    let w = worker(&config, MemoryStorage::with_quota(2), fetcher_with_manifest());

    let err = w.install().await.unwrap_err();
    assert!(matches!(err, LifecycleError::ShellWrite { .. }));
    assert!(w.context().store.list_keys("shell-v1").unwrap().is_empty());
    assert!(!w.context().store.list_tier_names().unwrap().contains("shell-v1"));
  }

  #[tokio::test]
  async fn test_activate_deletes_only_stale_tiers() {
    let store = MemoryStorage::new();
    let entry = CachedResponse::now(Response {
      status: 200,
      headers: Vec::new(),
      body: b"old".to_vec(),
      url: Url::parse(INDEX).unwrap(),
      redirected: false,
    });
    let key = Request::get(Url::parse(INDEX).unwrap()).key();
    for tier in ["shell-v1", "tile-v1", "font-v1"] {
      store.put(tier, &key, &entry).unwrap();
    }

    let mut config = Config::for_origin(ORIGIN);
    config.versions.shell = 2;
    let w = worker(&config, store, fetcher_with_manifest());

    w.install().await.unwrap();
    let deleted = w.activate().await.unwrap();

    assert_eq!(deleted, vec!["shell-v1".to_string()]);
    assert_eq!(w.phase(), Phase::Serving);
    assert_eq!(
      w.context().store.list_tier_names().unwrap(),
      ["font-v1", "shell-v2", "tile-v1"]
        .into_iter()
        .map(String::from)
        .collect()
    );
  }

  #[tokio::test]
  async fn test_activate_runs_once() {
    let config = Config::for_origin(ORIGIN);
    let w = worker(&config, MemoryStorage::new(), fetcher_with_manifest());
    w.install().await.unwrap();
    w.activate().await.unwrap();

    assert!(matches!(
      w.activate().await,
      Err(LifecycleError::InvalidPhase { .. })
    ));
    assert!(matches!(
      w.install().await,
      Err(LifecycleError::InvalidPhase { .. })
    ));
  }

  #[tokio::test]
  async fn test_requests_bypass_tiers_until_serving() {
    let config = Config::for_origin(ORIGIN);
    let fetcher = fetcher_with_manifest();
    fetcher.respond(TILE, 200, "tile");
    let w = worker(&config, MemoryStorage::new(), fetcher);

    let served = w
      .handle(Request::get(Url::parse(TILE).unwrap()))
      .await
      .unwrap();
    assert_eq!(served.source, ServedFrom::Passthrough);
    assert!(w.context().store.list_tier_names().unwrap().is_empty());

    w.start().await.unwrap();
    let served = w
      .handle(Request::get(Url::parse(TILE).unwrap()))
      .await
      .unwrap();
    assert_eq!(served.source, ServedFrom::Network);
    assert_eq!(w.context().store.list_keys("tile-v1").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_start_serves_shell_offline_after_install() {
    let config = Config::for_origin(ORIGIN);
    let w = worker(&config, MemoryStorage::new(), fetcher_with_manifest());
    w.start().await.unwrap();
    assert_eq!(w.phase(), Phase::Serving);

    let served = w
      .handle(Request::get(Url::parse(INDEX).unwrap()))
      .await
      .unwrap();
    assert_eq!(served.source, ServedFrom::Cache);
  }

  #[tokio::test]
  async fn test_start_skips_install_when_shell_already_seeded() {
    let config = Config::for_origin(ORIGIN);
    let store = MemoryStorage::new();
    let entry = CachedResponse::now(Response {
      status: 200,
      headers: Vec::new(),
      body: b"<html>".to_vec(),
      url: Url::parse(INDEX).unwrap(),
      redirected: false,
    });
    store
      .put("shell-v1", &Request::get(Url::parse(INDEX).unwrap()).key(), &entry)
      .unwrap();

    // Network entirely down: a second start must still succeed
    let w = worker(&config, store, FakeFetcher::new());
    assert!(w.is_installed().unwrap());
    w.start().await.unwrap();
    assert_eq!(w.phase(), Phase::Serving);
  }

  #[tokio::test]
  async fn test_warm_populates_tile_tier() {
    let config = Config::for_origin(ORIGIN);
    let fetcher = fetcher_with_manifest();
    let tiles: Vec<Url> = (0..3)
      .map(|n| {
        let url = format!("https://b.basemaps.cartocdn.com/dark_all/14/{}/6115.png", n);
        fetcher.respond(&url, 200, "png");
        Url::parse(&url).unwrap()
      })
      .collect();
    let w = worker(&config, MemoryStorage::new(), fetcher);
    w.start().await.unwrap();

    let results = w.warm(&tiles).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(w.context().store.list_keys("tile-v1").unwrap().len(), 3);
  }
}
