//! In-memory storage backend.
//!
//! Used by tests and ephemeral runs. Entries keep insertion order within
//! a partition; an optional per-partition entry cap models storage quota.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::StorageBackend;
use crate::error::StorageError;
use crate::http::{RequestKey, StoredResponse};

#[derive(Default)]
pub struct MemoryBackend {
  partitions: RwLock<HashMap<String, Vec<(RequestKey, StoredResponse)>>>,
  max_entries_per_partition: Option<usize>,
}

impl MemoryBackend {
  pub fn new() -> Self {
    Self::default()
  }

  /// Cap each partition at `max` entries; a new key past the cap fails
  /// with a quota error. Overwriting an existing key is always allowed.
  pub fn with_entry_cap(max: usize) -> Self {
    Self {
      partitions: RwLock::new(HashMap::new()),
      max_entries_per_partition: Some(max),
    }
  }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
  async fn create_partition(&self, name: &str) -> Result<(), StorageError> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    partitions.entry(name.to_string()).or_default();
    Ok(())
  }

  async fn put(
    &self,
    partition: &str,
    key: &RequestKey,
    response: &StoredResponse,
  ) -> Result<(), StorageError> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    let entries = partitions.entry(partition.to_string()).or_default();

    if let Some(existing) = entries.iter_mut().find(|(k, _)| k == key) {
      existing.1 = response.clone();
      return Ok(());
    }

    if let Some(max) = self.max_entries_per_partition {
      if entries.len() >= max {
        return Err(StorageError::QuotaExceeded);
      }
    }

    entries.push((key.clone(), response.clone()));
    Ok(())
  }

  async fn get(
    &self,
    partition: &str,
    key: &RequestKey,
  ) -> Result<Option<StoredResponse>, StorageError> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    Ok(
      partitions
        .get(partition)
        .and_then(|entries| entries.iter().find(|(k, _)| k == key))
        .map(|(_, response)| response.clone()),
    )
  }

  async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, StorageError> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    let Some(entries) = partitions.get_mut(partition) else {
      return Ok(false);
    };
    let before = entries.len();
    entries.retain(|(k, _)| k != key);
    Ok(entries.len() < before)
  }

  async fn drop_partition(&self, name: &str) -> Result<bool, StorageError> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    Ok(partitions.remove(name).is_some())
  }

  async fn list_partitions(&self) -> Result<Vec<String>, StorageError> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    let mut names: Vec<String> = partitions.keys().cloned().collect();
    names.sort();
    Ok(names)
  }

  async fn entry_count(&self, partition: &str) -> Result<usize, StorageError> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))?;
    Ok(partitions.get(partition).map_or(0, |entries| entries.len()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::Request;
  use url::Url;

  fn key(path: &str) -> RequestKey {
    Request::get(Url::parse(&format!("http://localhost:5173{}", path)).unwrap()).key()
  }

  fn response(body: &str) -> StoredResponse {
    StoredResponse::new(200, vec![], body.as_bytes().to_vec())
  }

  #[tokio::test]
  async fn put_registers_an_unknown_partition() {
    let backend = MemoryBackend::new();
    backend.put("late-v1", &key("/x"), &response("x")).await.unwrap();

    assert_eq!(backend.list_partitions().await.unwrap(), vec!["late-v1"]);
    assert_eq!(backend.entry_count("late-v1").await.unwrap(), 1);
  }

  #[tokio::test]
  async fn missing_partition_reads_are_misses_not_errors() {
    let backend = MemoryBackend::new();

    assert!(backend.get("nope", &key("/x")).await.unwrap().is_none());
    assert!(!backend.delete("nope", &key("/x")).await.unwrap());
    assert_eq!(backend.entry_count("nope").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn entry_cap_surfaces_quota_exceeded() {
    let backend = MemoryBackend::with_entry_cap(1);
    backend.put("p-v1", &key("/a"), &response("a")).await.unwrap();

    let err = backend.put("p-v1", &key("/b"), &response("b")).await.unwrap_err();
    assert!(matches!(err, StorageError::QuotaExceeded));

    // Overwriting the existing key still works at the cap.
    backend.put("p-v1", &key("/a"), &response("a2")).await.unwrap();
    assert_eq!(
      backend.get("p-v1", &key("/a")).await.unwrap().unwrap().body,
      b"a2"
    );
  }

  #[tokio::test]
  async fn overwrite_keeps_one_entry_per_key() {
    let backend = MemoryBackend::new();
    backend.put("p-v1", &key("/a"), &response("one")).await.unwrap();
    backend.put("p-v1", &key("/a"), &response("two")).await.unwrap();

    assert_eq!(backend.entry_count("p-v1").await.unwrap(), 1);
    assert_eq!(
      backend.get("p-v1", &key("/a")).await.unwrap().unwrap().body,
      b"two"
    );
  }
}
