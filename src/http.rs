//! Request identity and stored-response types shared by the store,
//! strategies, and the interception boundary.

use chrono::{DateTime, Utc};
use reqwest::Method;
use sha2::{Digest, Sha256};
use url::Url;

/// An outbound request offered to the worker for interception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self { method, url }
  }

  /// Convenience constructor for the common case.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// The cache identity of this request.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// Cache key derived from method + full URL (query string included).
///
/// Only GET requests ever reach a partition; the policy selector bypasses
/// everything else before a key is used for storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  canonical: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    Self {
      canonical: format!("{} {}", method, url),
    }
  }

  /// The readable form, e.g. `GET https://example.com/assets/app.js`.
  pub fn as_str(&self) -> &str {
    &self.canonical
  }

  /// SHA256 hash for stable, fixed-length storage keys.
  pub fn hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl std::fmt::Display for RequestKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.canonical)
  }
}

/// An immutable snapshot of a response at capture time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  /// When the snapshot was captured. Used only for background
  /// revalidation bookkeeping; there is no TTL eviction.
  pub cached_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      cached_at: Utc::now(),
    }
  }

  /// Rebuild a snapshot read back from persistent storage.
  pub fn from_parts(
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    cached_at: DateTime<Utc>,
  ) -> Self {
    Self {
      status,
      headers,
      body,
      cached_at,
    }
  }

  /// Synthetic 404 returned when neither cache nor network can serve an
  /// image request. Never an error: callers always get a response.
  pub fn unavailable() -> Self {
    Self::new(
      404,
      vec![("content-type".to_string(), "text/plain".to_string())],
      b"unavailable".to_vec(),
    )
  }

  /// Whether this response is cacheable (HTTP success). Redirects and
  /// errors are never cached.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }
}

/// Outcome of offering a request to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterceptResult {
  /// A response, from cache or network.
  Response(StoredResponse),
  /// The request was handled but neither cache nor network produced
  /// anything to serve (static-asset dead end).
  Unavailable,
  /// Explicit decline: the request passes through untouched.
  Bypass,
}

impl InterceptResult {
  pub fn response(&self) -> Option<&StoredResponse> {
    match self {
      InterceptResult::Response(r) => Some(r),
      _ => None,
    }
  }

  pub fn is_bypass(&self) -> bool {
    matches!(self, InterceptResult::Bypass)
  }
}
