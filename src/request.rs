//! Request and response model shared by the dispatcher, the fetcher and the stores.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use url::Url;

/// An intercepted outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: String,
  pub url: Url,
  pub headers: Vec<(String, String)>,
}

impl Request {
  /// Plain `GET` with no extra headers.
  pub fn get(url: Url) -> Self {
    Self {
      method: "GET".to_string(),
      url,
      headers: Vec::new(),
    }
  }

  pub fn with_method(mut self, method: &str) -> Self {
    self.method = method.to_ascii_uppercase();
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// Only `GET` requests are ever written to a tier.
  pub fn is_cacheable_method(&self) -> bool {
    self.method.eq_ignore_ascii_case("GET")
  }

  /// Lowercased host component, without any trailing dot.
  pub fn host(&self) -> Option<String> {
    self
      .url
      .host_str()
      .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
  }

  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Normalized request identity: method plus URL, no body and no fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey(String);

impl RequestKey {
  pub fn new(method: &str, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self(format!("{} {}", method.to_ascii_uppercase(), url))
  }

  /// Rebuild a key from its stored string form.
  pub fn from_stored(raw: impl Into<String>) -> Self {
    Self(raw.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// SHA256 hex digest, used as a fixed-length index column.
  pub fn digest(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.0.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

/// A network (or cached) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// Final URL after redirects
  pub url: Url,
  /// True if the response was reached through at least one redirect
  pub redirected: bool,
}

impl Response {
  /// 2xx, excluding partial content.
  pub fn is_cacheable(&self) -> bool {
    (200..300).contains(&self.status) && self.status != 206
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}

/// A response as persisted in a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written; only the age pass of eviction reads it
  pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn now(response: Response) -> Self {
    Self {
      response,
      stored_at: Utc::now(),
    }
  }
}
