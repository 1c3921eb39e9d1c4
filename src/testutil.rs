//! Shared test helpers: scripted fetcher and request/response builders.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::NetworkError;
use crate::http::{Request, StoredResponse};
use crate::net::Fetcher;

pub fn url(s: &str) -> Url {
  Url::parse(s).unwrap()
}

pub fn get(s: &str) -> Request {
  Request::get(url(s))
}

pub fn ok(body: &str) -> StoredResponse {
  status(200, body)
}

pub fn status(code: u16, body: &str) -> StoredResponse {
  StoredResponse::new(code, vec![], body.as_bytes().to_vec())
}

/// One scripted network outcome.
pub enum FetchOutcome {
  Respond(StoredResponse),
  Fail,
}

/// Fetcher that pops scripted outcomes in order and counts calls.
/// An exhausted script fails every further fetch.
pub struct ScriptedFetcher {
  script: Mutex<VecDeque<FetchOutcome>>,
  calls: AtomicUsize,
  delay: Duration,
}

impl ScriptedFetcher {
  pub fn new(outcomes: Vec<FetchOutcome>) -> Self {
    Self {
      script: Mutex::new(outcomes.into()),
      calls: AtomicUsize::new(0),
      delay: Duration::ZERO,
    }
  }

  /// Delay every fetch, to assert a caller did not wait on the network.
  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
  async fn fetch(&self, _request: &Request) -> Result<StoredResponse, NetworkError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    match self.script.lock().unwrap().pop_front() {
      Some(FetchOutcome::Respond(response)) => Ok(response),
      Some(FetchOutcome::Fail) | None => {
        Err(NetworkError::Transport("scripted failure".to_string()))
      }
    }
  }
}
