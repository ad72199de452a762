//! Network access behind a trait, so the dispatcher can run against fakes.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use std::time::Duration;

use crate::error::FetchError;
use crate::request::{Request, Response};

/// Performs a single network exchange.
#[async_trait]
pub trait Fetcher: Send + Sync {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError>;
}

/// `reqwest`-backed fetcher. Follows redirects and records whether any happened.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("mapstash/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
      .map_err(|_| FetchError::InvalidRequest(format!("bad method '{}'", request.method)))?;

    let mut builder = self.client.request(method, request.url.clone());
    for (name, value) in &request.headers {
      builder = builder.header(name.as_str(), value.as_str());
    }

    let url = request.url.to_string();
    let resp = builder.send().await.map_err(|e| to_fetch_error(&url, e))?;

    let status = resp.status().as_u16();
    let final_url = resp.url().clone();
    let redirected = !same_resource(&final_url, &request.url);
    let headers = resp
      .headers()
      .iter()
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = resp
      .bytes()
      .await
      .map_err(|e| to_fetch_error(&url, e))?
      .to_vec();

    Ok(Response {
      status,
      headers,
      body,
      url: final_url,
      redirected,
    })
  }
}

fn to_fetch_error(url: &str, e: reqwest::Error) -> FetchError {
  if e.is_timeout() {
    FetchError::Timeout {
      url: url.to_string(),
    }
  } else {
    FetchError::Transport {
      url: url.to_string(),
      message: e.to_string(),
    }
  }
}

fn same_resource(a: &url::Url, b: &url::Url) -> bool {
  let mut a = a.clone();
  let mut b = b.clone();
  a.set_fragment(None);
  b.set_fragment(None);
  a == b
}
