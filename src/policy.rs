//! Request classification.
//!
//! A pure function of (method, URL) deciding which caching strategy, if
//! any, handles a request. Classification is total: every request maps to
//! exactly one class, with ambiguity resolved by fixed rule priority
//! (non-GET, image host, static pattern, app route, bypass).

use reqwest::Method;

use crate::config::WorkerConfig;
use crate::http::Request;

/// Resource class a request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
  /// Served stale-while-revalidate from the image partition.
  Image,
  /// Served cache-first from the static partition.
  Static,
  /// Served network-first from the dynamic partition.
  Route,
  /// Not intercepted; the request passes through untouched.
  Bypass,
}

/// Classifies requests according to the configured allowlists.
#[derive(Debug, Clone)]
pub struct PolicySelector {
  image_hosts: Vec<String>,
  static_prefixes: Vec<String>,
  static_extensions: Vec<String>,
  route_exact: Vec<String>,
  route_prefixes: Vec<String>,
}

impl PolicySelector {
  pub fn new(config: &WorkerConfig) -> Self {
    Self {
      image_hosts: config.image_hosts.clone(),
      static_prefixes: config.static_prefixes.clone(),
      static_extensions: config.static_extensions.clone(),
      route_exact: config.routes.exact.clone(),
      route_prefixes: config.routes.prefixes.clone(),
    }
  }

  pub fn classify(&self, request: &Request) -> RequestClass {
    if request.method != Method::GET {
      return RequestClass::Bypass;
    }

    let path = request.url.path();

    if let Some(host) = request.url.host_str() {
      if self.image_hosts.iter().any(|h| h == host) {
        return RequestClass::Image;
      }
    }

    let static_by_prefix = self.static_prefixes.iter().any(|p| path.starts_with(p.as_str()));
    let static_by_extension = self
      .static_extensions
      .iter()
      .any(|ext| path.ends_with(&format!(".{}", ext)));
    if static_by_prefix || static_by_extension {
      return RequestClass::Static;
    }

    let route_exact = self.route_exact.iter().any(|r| path == r.as_str());
    let route_prefix = self.route_prefixes.iter().any(|r| path.starts_with(r.as_str()));
    if route_exact || route_prefix {
      return RequestClass::Route;
    }

    RequestClass::Bypass
  }
}
