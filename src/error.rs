//! Errors surfaced at the library seams.

use thiserror::Error;

/// A network fetch that could not complete.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} failed: {message}")]
  Transport { url: String, message: String },

  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

/// The only failure a caller of the dispatcher ever observes: the network was
/// needed and did not answer.
#[derive(Debug, Error)]
pub enum DispatchError {
  #[error("network failure with no cached fallback: {0}")]
  Network(#[from] FetchError),
}

/// Failures of the install/activate lifecycle.
#[derive(Debug, Error)]
pub enum LifecycleError {
  #[error("install failed fetching {url}: {source}")]
  ManifestFetch {
    url: String,
    #[source]
    source: FetchError,
  },

  #[error("install failed: {url} answered with status {status}")]
  ManifestStatus { url: String, status: u16 },

  #[error("install failed writing {tier}: {message}")]
  ShellWrite { tier: String, message: String },

  #[error("cannot {action} while {phase}")]
  InvalidPhase {
    action: &'static str,
    phase: &'static str,
  },

  #[error("activation failed: {0}")]
  Store(String),
}
