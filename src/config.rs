//! Worker configuration.
//!
//! Everything the caching layer used to pick up from ambient globals
//! (partition names, the pre-cache manifest, route and image allowlists)
//! is injected through this struct so the layer runs the same way under
//! tests as it does in front of a live application.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Prefix for every partition name (e.g. `shopmart-static-v1`).
  pub app_name: String,
  /// Generation number; bumped on every deployment. Partitions from other
  /// generations are destroyed on activation.
  pub generation: u32,
  /// Origin the application is served from; pre-cache paths and the shell
  /// path are resolved against it. Validated when first resolved.
  pub origin: String,
  /// Critical assets cached during install.
  pub precache: Vec<String>,
  /// Hosts whose responses are treated as images.
  pub image_hosts: Vec<String>,
  /// Path prefixes identifying static asset bundles.
  pub static_prefixes: Vec<String>,
  /// Path extensions identifying static asset bundles.
  pub static_extensions: Vec<String>,
  /// Application routes served network-first.
  pub routes: RoutesConfig,
  /// Root-document path used as the last-resort fallback for routes.
  pub shell_path: String,
  /// Upper bound on any single network fetch, in seconds.
  pub fetch_timeout_secs: u64,
  /// Broadcast to connected clients once activation completes.
  pub activated_message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
  /// Exact-match paths.
  pub exact: Vec<String>,
  /// Prefix-match paths.
  pub prefixes: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      exact: vec!["/".to_string(), "/cart".to_string()],
      prefixes: vec!["/product".to_string()],
    }
  }
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      app_name: "shopmart".to_string(),
      generation: 1,
      origin: "http://localhost:5173".to_string(),
      precache: vec![
        "/".to_string(),
        "/index.html".to_string(),
        "/vite.svg".to_string(),
        "/manifest.json".to_string(),
      ],
      image_hosts: vec!["picsum.photos".to_string()],
      static_prefixes: vec!["/assets/".to_string()],
      static_extensions: vec!["js".to_string(), "css".to_string()],
      routes: RoutesConfig::default(),
      shell_path: "/".to_string(),
      fetch_timeout_secs: 10,
      activated_message: "ShopMart is ready for offline use!".to_string(),
    }
  }
}

impl WorkerConfig {
  /// Load configuration.
  ///
  /// An explicit path must exist and parse. Without one, the first of
  /// `./shopworker.yaml` and `$XDG_CONFIG_HOME/shopworker/config.yaml`
  /// that exists is used; when neither does, the built-in defaults apply.
  /// The defaults mirror the deployed storefront, so the worker runs
  /// usefully with no config file at all.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    if let Some(path) = explicit_path {
      return Self::from_file(path);
    }

    let candidates = [
      Some(PathBuf::from("shopworker.yaml")),
      dirs::config_dir().map(|dir| dir.join("shopworker").join("config.yaml")),
    ];

    match candidates.into_iter().flatten().find(|p| p.exists()) {
      Some(path) => Self::from_file(&path),
      None => Ok(Self::default()),
    }
  }

  fn from_file(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Cannot read config {}: {}", path.display(), e))?;
    serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Invalid config {}: {}", path.display(), e))
  }

  /// Partition holding pre-cached and fetched static assets.
  pub fn static_partition(&self) -> String {
    format!("{}-static-v{}", self.app_name, self.generation)
  }

  /// Partition holding network-first route responses.
  pub fn dynamic_partition(&self) -> String {
    format!("{}-dynamic-v{}", self.app_name, self.generation)
  }

  /// Partition holding image responses.
  pub fn image_partition(&self) -> String {
    format!("{}-images-v{}", self.app_name, self.generation)
  }

  /// The set of partition names that survive activation.
  pub fn generation_set(&self) -> Vec<String> {
    vec![
      self.static_partition(),
      self.dynamic_partition(),
      self.image_partition(),
    ]
  }

  /// Absolute URL of the application shell.
  pub fn shell_url(&self) -> Result<Url> {
    self.resolve(&self.shell_path)
  }

  /// Resolve a pre-cache manifest entry against the configured origin.
  /// Absolute entries are taken as-is.
  pub fn resolve(&self, path_or_url: &str) -> Result<Url> {
    if let Ok(url) = Url::parse(path_or_url) {
      return Ok(url);
    }

    let origin = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))?;
    origin
      .join(path_or_url)
      .map_err(|e| eyre!("Cannot resolve {} against {}: {}", path_or_url, self.origin, e))
  }

  pub fn fetch_timeout(&self) -> Duration {
    Duration::from_secs(self.fetch_timeout_secs)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_the_deployed_worker() {
    let config = WorkerConfig::default();

    assert_eq!(config.static_partition(), "shopmart-static-v1");
    assert_eq!(config.dynamic_partition(), "shopmart-dynamic-v1");
    assert_eq!(config.image_partition(), "shopmart-images-v1");
    assert_eq!(config.precache.len(), 4);
    assert_eq!(config.image_hosts, vec!["picsum.photos"]);
  }

  #[test]
  fn generation_bump_renames_every_partition() {
    let config = WorkerConfig {
      generation: 2,
      ..WorkerConfig::default()
    };

    assert_eq!(
      config.generation_set(),
      vec![
        "shopmart-static-v2",
        "shopmart-dynamic-v2",
        "shopmart-images-v2"
      ]
    );
  }

  #[test]
  fn partial_yaml_overrides_keep_remaining_defaults() {
    let config: WorkerConfig = serde_yaml::from_str(
      "app_name: bookmart\ngeneration: 3\nimage_hosts:\n  - images.example\n",
    )
    .unwrap();

    assert_eq!(config.static_partition(), "bookmart-static-v3");
    assert_eq!(config.image_hosts, vec!["images.example"]);
    // Untouched fields keep their defaults.
    assert_eq!(config.shell_path, "/");
    assert_eq!(config.fetch_timeout_secs, 10);
  }

  #[test]
  fn explicit_config_path_is_loaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.yaml");
    std::fs::write(&path, "generation: 9\n").unwrap();

    let config = WorkerConfig::load(Some(&path)).unwrap();
    assert_eq!(config.generation, 9);
    assert_eq!(config.app_name, "shopmart");
  }

  #[test]
  fn missing_explicit_path_is_an_error() {
    let err = WorkerConfig::load(Some(Path::new("/nonexistent/worker.yaml"))).unwrap_err();
    assert!(err.to_string().contains("worker.yaml"));
  }

  #[test]
  fn resolve_joins_paths_and_passes_absolute_urls() {
    let config = WorkerConfig::default();

    assert_eq!(
      config.resolve("/manifest.json").unwrap().as_str(),
      "http://localhost:5173/manifest.json"
    );
    assert_eq!(
      config.resolve("https://cdn.example/app.js").unwrap().as_str(),
      "https://cdn.example/app.js"
    );
    assert_eq!(config.shell_url().unwrap().path(), "/");
  }

  #[test]
  fn a_garbled_origin_surfaces_when_resolving() {
    let config = WorkerConfig {
      origin: "not a url".to_string(),
      ..WorkerConfig::default()
    };

    let err = config.resolve("/manifest.json").unwrap_err();
    assert!(err.to_string().contains("Invalid origin"));
  }
}
