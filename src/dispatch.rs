//! Request dispatcher that routes every intercepted request to a tier strategy.

use std::sync::Arc;
use tracing::{debug, warn};
use url::{Origin, Url};

use crate::cache::{sweep, Served, Strategy, TierKind, TierSpec, TierStore};
use crate::classify::{DomainClassifier, RequestClass};
use crate::context::CacheContext;
use crate::error::DispatchError;
use crate::fetch::Fetcher;
use crate::request::{CachedResponse, Request, RequestKey, Response};

/// Routes requests to the shell, tile or font tier, or straight to the network.
///
/// Cheap to clone; clones share the same store, fetcher and classifier, so
/// `handle` may run concurrently from many tasks.
pub struct Dispatcher<S: TierStore, F: Fetcher> {
  context: Arc<CacheContext<S>>,
  fetcher: Arc<F>,
  classifier: Arc<DomainClassifier>,
  origin: Origin,
}

impl<S, F> Dispatcher<S, F>
where
  S: TierStore + 'static,
  F: Fetcher + 'static,
{
  pub fn new(
    context: Arc<CacheContext<S>>,
    fetcher: Arc<F>,
    classifier: DomainClassifier,
    origin: &Url,
  ) -> Self {
    Self {
      context,
      fetcher,
      classifier: Arc::new(classifier),
      origin: origin.origin(),
    }
  }

  /// Same-origin requests are shell; everything else goes by host.
  pub fn route(&self, request: &Request) -> RequestClass {
    if request.url.origin() == self.origin {
      return RequestClass::Shell;
    }

    match request.host() {
      Some(host) => self.classifier.classify(&host),
      None => RequestClass::Unclassified,
    }
  }

  /// Answer one intercepted request.
  pub async fn handle(&self, request: Request) -> Result<Served, DispatchError> {
    let class = self.route(&request);
    debug!(method = %request.method, url = %request.url, ?class, "Dispatching request");

    if !request.is_cacheable_method() {
      return self.passthrough(&request).await;
    }

    let kind = match class {
      RequestClass::Shell => TierKind::Shell,
      RequestClass::Tile => TierKind::Tile,
      RequestClass::Font => TierKind::Font,
      RequestClass::Unclassified => return self.passthrough(&request).await,
    };

    match self.context.tier(kind).strategy {
      Strategy::CacheFirst => self.cache_first(kind, request).await,
      Strategy::StaleWhileRevalidate => self.stale_while_revalidate(kind, request).await,
      Strategy::NetworkFirst => self.network_first(kind, request).await,
    }
  }

  /// Network only, nothing stored, errors handed straight back.
  pub async fn passthrough(&self, request: &Request) -> Result<Served, DispatchError> {
    let response = self.fetcher.fetch(request).await?;
    Ok(Served::passthrough(response))
  }

  /// 1. Tier hit: return it without touching the network
  /// 2. Miss: fetch, store a cacheable copy, return the network response
  /// 3. Miss and network failure: the request fails
  async fn cache_first(&self, kind: TierKind, request: Request) -> Result<Served, DispatchError> {
    let tier = self.context.tier(kind);
    let key = request.key();

    if let Some(cached) = self.lookup(tier, &key) {
      debug!(tier = %tier.name, %key, "Cache hit");
      return Ok(Served::from_cache(cached.response, cached.stored_at));
    }

    let response = self.fetcher.fetch(&request).await?;
    self.store(tier, &key, &response);
    Ok(Served::from_network(response))
  }

  /// 1. Tier hit: return it now and refresh in a background task
  /// 2. Miss: wait for the network, store a cacheable copy
  /// 3. Miss and network failure: the request fails
  async fn stale_while_revalidate(
    &self,
    kind: TierKind,
    request: Request,
  ) -> Result<Served, DispatchError> {
    let tier = self.context.tier(kind);
    let key = request.key();

    match self.lookup(tier, &key) {
      Some(cached) => {
        debug!(tier = %tier.name, %key, "Cache hit, revalidating in background");
        self.spawn_refresh(kind, request, key);
        Ok(Served::from_cache(cached.response, cached.stored_at))
      }
      None => {
        let response = self.fetcher.fetch(&request).await?;
        self.store(tier, &key, &response);
        Ok(Served::from_network(response))
      }
    }
  }

  /// 1. Network answers: store a cacheable copy and return it
  /// 2. Network fails: fall back to the tier
  /// 3. Both fail: the request fails
  async fn network_first(&self, kind: TierKind, request: Request) -> Result<Served, DispatchError> {
    let tier = self.context.tier(kind);
    let key = request.key();

    match self.fetcher.fetch(&request).await {
      Ok(response) => {
        self.store(tier, &key, &response);
        Ok(Served::from_network(response))
      }
      Err(e) => match self.lookup(tier, &key) {
        Some(cached) => {
          debug!(tier = %tier.name, %key, error = %e, "Network failed, serving cached copy");
          Ok(Served::from_cache(cached.response, cached.stored_at))
        }
        None => Err(e.into()),
      },
    }
  }

  /// Store read failures count as misses.
  fn lookup(&self, tier: &TierSpec, key: &RequestKey) -> Option<CachedResponse> {
    match self.context.store.get(&tier.name, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!(tier = %tier.name, %key, error = %e, "Cache read failed, treating as miss");
        None
      }
    }
  }

  fn is_cacheable(&self, kind: TierKind, response: &Response) -> bool {
    if !response.is_cacheable() {
      return false;
    }
    match kind {
      // Shell only keeps plain same-origin responses
      TierKind::Shell => !response.redirected && response.url.origin() == self.origin,
      TierKind::Tile | TierKind::Font => true,
    }
  }

  /// Write a cacheable response. A failed write is logged and skipped; it never
  /// fails the request.
  fn store(&self, tier: &TierSpec, key: &RequestKey, response: &Response) {
    if !self.is_cacheable(tier.kind, response) {
      debug!(tier = %tier.name, %key, status = response.status, "Response not cacheable");
      return;
    }

    let entry = CachedResponse::now(response.clone());
    match self.context.store.put(&tier.name, key, &entry) {
      Ok(()) => self.schedule_eviction(tier),
      Err(e) => warn!(tier = %tier.name, %key, error = %e, "Cache update skipped"),
    }
  }

  /// Fire-and-forget refresh; nobody awaits it.
  fn spawn_refresh(&self, kind: TierKind, request: Request, key: RequestKey) {
    let this = self.clone();
    tokio::spawn(async move {
      match this.fetcher.fetch(&request).await {
        Ok(response) => this.store(this.context.tier(kind), &key, &response),
        Err(e) => debug!(%key, error = %e, "Background refresh failed, keeping cached copy"),
      }
    });
  }

  /// Sweep bounded tiers off the response path.
  fn schedule_eviction(&self, tier: &TierSpec) {
    let Some(policy) = tier.eviction_policy() else {
      return;
    };

    let store = Arc::clone(&self.context.store);
    let name = tier.name.clone();
    tokio::task::spawn_blocking(move || {
      if let Err(e) = sweep(store.as_ref(), &name, &policy) {
        warn!(tier = %name, error = %e, "Eviction sweep failed");
      }
    });
  }
}

impl<S: TierStore, F: Fetcher> Clone for Dispatcher<S, F> {
  fn clone(&self) -> Self {
    Self {
      context: Arc::clone(&self.context),
      fetcher: Arc::clone(&self.fetcher),
      classifier: Arc::clone(&self.classifier),
      origin: self.origin.clone(),
    }
  }
}
