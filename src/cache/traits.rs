//! Core types describing where a dispatched response came from.

use chrono::{DateTime, Utc};

use crate::request::Response;

/// Result of a dispatched request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Served {
  /// The actual response
  pub response: Response,
  /// Where the response came from
  pub source: ServedFrom,
  /// When the entry was stored (if served from a tier)
  pub stored_at: Option<DateTime<Utc>>,
}

impl Served {
  /// Fresh response from the network, possibly written to a tier.
  pub fn from_network(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Network,
      stored_at: None,
    }
  }

  /// Response read from a tier.
  pub fn from_cache(response: Response, stored_at: DateTime<Utc>) -> Self {
    Self {
      response,
      source: ServedFrom::Cache,
      stored_at: Some(stored_at),
    }
  }

  /// Network response that bypassed every tier.
  pub fn passthrough(response: Response) -> Self {
    Self {
      response,
      source: ServedFrom::Passthrough,
      stored_at: None,
    }
  }
}

/// Indicates where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServedFrom {
  /// Fetched from network through a tier strategy
  Network,
  /// Read from a tier
  Cache,
  /// Fetched from network with no tier involved
  Passthrough,
}

impl ServedFrom {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Passthrough => "passthrough",
    }
  }
}
