//! Network fetching.
//!
//! The strategies talk to the network through the `Fetcher` trait so the
//! whole caching layer runs under tests with scripted responses. The real
//! implementation wraps a reqwest client with a bounded timeout; no
//! fetch may suspend forever.

use async_trait::async_trait;
use std::time::Duration;

use crate::error::NetworkError;
use crate::http::{Request, StoredResponse};

#[async_trait]
pub trait Fetcher: Send + Sync {
  /// Issue the request and snapshot the response. Every failure mode
  /// (DNS, connect, timeout, body read) maps to a `NetworkError`.
  async fn fetch(&self, request: &Request) -> Result<StoredResponse, NetworkError>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
  client: reqwest::Client,
}

impl HttpFetcher {
  pub fn new(timeout: Duration) -> Result<Self, NetworkError> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| NetworkError::Transport(e.to_string()))?;
    Ok(Self { client })
  }
}

#[async_trait]
impl Fetcher for HttpFetcher {
  async fn fetch(&self, request: &Request) -> Result<StoredResponse, NetworkError> {
    let response = self
      .client
      .request(request.method.clone(), request.url.clone())
      .send()
      .await
      .map_err(map_reqwest_err)?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .map(|(name, value)| {
        (
          name.as_str().to_string(),
          String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
      })
      .collect();
    let body = response.bytes().await.map_err(map_reqwest_err)?.to_vec();

    Ok(StoredResponse::new(status, headers, body))
  }
}

fn map_reqwest_err(e: reqwest::Error) -> NetworkError {
  if e.is_timeout() {
    NetworkError::Timeout
  } else {
    NetworkError::Transport(e.to_string())
  }
}
