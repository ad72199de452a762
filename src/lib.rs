//! Tiered offline cache for map clients.
//!
//! Every outbound request of a map client is routed through a `Worker`:
//! - same-origin application assets are served cache-first from the shell tier
//! - tile imagery is served stale-while-revalidate from a size-bounded tile tier
//! - web fonts are served cache-first from the font tier
//! - anything else goes straight to the network
//!
//! Tiers are versioned; activating a new deployment drops tiers whose version
//! no longer matches.

pub mod cache;
pub mod classify;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod lifecycle;
pub mod logging;
pub mod request;

#[cfg(test)]
mod testing;

pub use cache::{MemoryStorage, Served, ServedFrom, SqliteStorage, TierStore};
pub use config::Config;
pub use dispatch::Dispatcher;
pub use error::{DispatchError, FetchError, LifecycleError};
pub use fetch::{Fetcher, HttpFetcher};
pub use lifecycle::{Phase, Worker};
pub use request::{CachedResponse, Request, RequestKey, Response};
