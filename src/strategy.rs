//! Caching strategies.
//!
//! Each strategy decides how a request is satisfied from cache vs.
//! network for one partition. Strategies never leak raw failures past
//! their contract: images always yield a response (synthetic 404 at
//! worst), static assets yield whatever the cache holds, and only a
//! route with no network, no cached entry, and no shell surfaces an
//! error. Responses are cached on HTTP success only; redirects and
//! errors never enter a partition.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Error, NetworkError};
use crate::http::{Request, RequestKey, StoredResponse};
use crate::net::Fetcher;
use crate::store::Partition;

/// Runs the caching algorithms against a fetcher and partition handles.
#[derive(Clone)]
pub struct StrategyEngine {
  fetcher: Arc<dyn Fetcher>,
}

impl StrategyEngine {
  pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
    Self { fetcher }
  }

  /// Stale-while-revalidate, used for images.
  ///
  /// A cached entry is returned immediately and refreshed by a spawned
  /// background fetch; the caller never waits on the network for a hit.
  /// On a miss the caller awaits the fetch, and a dead end (network
  /// failure, nothing cached) yields a synthetic 404 placeholder.
  pub async fn stale_while_revalidate(
    &self,
    request: &Request,
    partition: &Partition,
  ) -> StoredResponse {
    let key = request.key();

    let cached = match partition.get(&key).await {
      Ok(cached) => cached,
      Err(e) => {
        // Degrade to network-only; the caller still gets a response.
        warn!("cache read failed for {}: {}", key, e);
        None
      }
    };

    if let Some(hit) = cached {
      self.spawn_revalidation(request.clone(), partition.clone());
      return hit;
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = partition.put(&key, &response).await {
            warn!("failed to cache {}: {}", key, e);
          }
        }
        response
      }
      Err(e) => {
        debug!("image fetch failed for {}: {}", key, e);
        StoredResponse::unavailable()
      }
    }
  }

  /// Refresh an entry after it has already been served. The task outlives
  /// the original response and is not cancelable; failures stay silent.
  fn spawn_revalidation(&self, request: Request, partition: Partition) {
    let fetcher = Arc::clone(&self.fetcher);
    tokio::spawn(async move {
      let key = request.key();
      match fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => {
          if let Err(e) = partition.put(&key, &response).await {
            warn!("failed to refresh {}: {}", key, e);
          }
        }
        Ok(response) => {
          debug!("revalidation of {} returned {}; keeping cached entry", key, response.status);
        }
        Err(e) => {
          debug!("revalidation of {} failed: {}", key, e);
        }
      }
    });
  }

  /// Cache-first, used for static assets.
  ///
  /// A hit is served with zero network calls. A miss goes to the
  /// network; success is cached and returned either way. If the network
  /// is down too, the answer is whatever the cache yields for the key,
  /// possibly nothing.
  pub async fn cache_first(
    &self,
    request: &Request,
    partition: &Partition,
  ) -> Option<StoredResponse> {
    let key = request.key();

    match partition.get(&key).await {
      Ok(Some(hit)) => return Some(hit),
      Ok(None) => {}
      Err(e) => warn!("cache read failed for {}: {}", key, e),
    }

    match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = partition.put(&key, &response).await {
            // The network response is still returned to the caller.
            warn!("failed to cache {}: {}", key, e);
          }
        }
        Some(response)
      }
      Err(e) => {
        debug!("static fetch failed for {}: {}", key, e);
        partition.get(&key).await.ok().flatten()
      }
    }
  }

  /// Network-first with fallback, used for app routes.
  ///
  /// Network success always wins and refreshes the cache. On failure the
  /// exact cached entry is served, then the designated shell entry, and
  /// only when both are absent does the network error surface.
  pub async fn network_first(
    &self,
    request: &Request,
    partition: &Partition,
    shell: Option<(&Partition, &RequestKey)>,
  ) -> Result<StoredResponse, Error> {
    let key = request.key();

    let network_err: NetworkError = match self.fetcher.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          if let Err(e) = partition.put(&key, &response).await {
            warn!("failed to cache {}: {}", key, e);
          }
        }
        return Ok(response);
      }
      Err(e) => e,
    };

    debug!("route fetch failed for {}: {}", key, network_err);

    if let Ok(Some(hit)) = partition.get(&key).await {
      return Ok(hit);
    }

    if let Some((shell_partition, shell_key)) = shell {
      if let Ok(Some(shell_hit)) = shell_partition.get(shell_key).await {
        return Ok(shell_hit);
      }
    }

    Err(Error::Network(network_err))
  }
}
