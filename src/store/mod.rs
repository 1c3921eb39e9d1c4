//! Named cache partitions over swappable storage backends.
//!
//! A partition is a named, versioned namespace of request→response
//! entries (at most one entry per key, last write wins). `CacheStore` is
//! the facade the rest of the worker talks to; backends only implement
//! the raw per-partition operations. Two backends exist: an in-memory
//! store and a SQLite store for persistence across runs.

mod memory;
mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StorageError;
use crate::http::{RequestKey, StoredResponse};

/// Raw partition operations a backend must provide.
///
/// Backends serialize access internally, so every put/get is atomic with
/// respect to other operations on the same key. `put` registers the
/// partition if it does not exist yet; reads against a missing partition
/// are misses, not errors.
#[async_trait]
pub trait StorageBackend: Send + Sync {
  /// Register a partition. Idempotent; an empty partition is enumerable.
  async fn create_partition(&self, name: &str) -> Result<(), StorageError>;

  /// Store an entry, overwriting any previous value for the key.
  async fn put(
    &self,
    partition: &str,
    key: &RequestKey,
    response: &StoredResponse,
  ) -> Result<(), StorageError>;

  async fn get(
    &self,
    partition: &str,
    key: &RequestKey,
  ) -> Result<Option<StoredResponse>, StorageError>;

  /// Remove one entry. Returns whether an entry existed.
  async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, StorageError>;

  /// Destroy a partition and all its entries. Returns whether it existed.
  async fn drop_partition(&self, name: &str) -> Result<bool, StorageError>;

  /// All registered partition names.
  async fn list_partitions(&self) -> Result<Vec<String>, StorageError>;

  /// Number of entries in one partition (0 when absent).
  async fn entry_count(&self, partition: &str) -> Result<usize, StorageError>;
}

/// Facade over a storage backend, handing out partition handles.
#[derive(Clone)]
pub struct CacheStore {
  backend: Arc<dyn StorageBackend>,
}

impl CacheStore {
  pub fn new(backend: impl StorageBackend + 'static) -> Self {
    Self {
      backend: Arc::new(backend),
    }
  }

  /// Open a partition, creating it if absent. Idempotent.
  pub async fn open(&self, name: &str) -> Result<Partition, StorageError> {
    self.backend.create_partition(name).await?;
    Ok(Partition {
      backend: Arc::clone(&self.backend),
      name: name.to_string(),
    })
  }

  pub async fn partition_names(&self) -> Result<Vec<String>, StorageError> {
    self.backend.list_partitions().await
  }

  /// Destroy one partition. Returns whether it existed.
  pub async fn remove(&self, name: &str) -> Result<bool, StorageError> {
    self.backend.drop_partition(name).await
  }

  /// Total entry count across every partition (entries, not bytes).
  pub async fn total_entries(&self) -> Result<usize, StorageError> {
    let mut total = 0;
    for name in self.backend.list_partitions().await? {
      total += self.backend.entry_count(&name).await?;
    }
    Ok(total)
  }

  /// Destroy every partition unconditionally. Returns how many existed.
  pub async fn clear(&self) -> Result<usize, StorageError> {
    let names = self.backend.list_partitions().await?;
    let mut dropped = 0;
    for name in &names {
      if self.backend.drop_partition(name).await? {
        dropped += 1;
      }
    }
    Ok(dropped)
  }
}

/// Handle to one named partition. Cheap to clone; the store owns the
/// entry bytes, handles only refer into it.
#[derive(Clone)]
pub struct Partition {
  backend: Arc<dyn StorageBackend>,
  name: String,
}

impl Partition {
  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn put(&self, key: &RequestKey, response: &StoredResponse) -> Result<(), StorageError> {
    self.backend.put(&self.name, key, response).await
  }

  pub async fn get(&self, key: &RequestKey) -> Result<Option<StoredResponse>, StorageError> {
    self.backend.get(&self.name, key).await
  }

  pub async fn delete(&self, key: &RequestKey) -> Result<bool, StorageError> {
    self.backend.delete(&self.name, key).await
  }

  pub async fn len(&self) -> Result<usize, StorageError> {
    self.backend.entry_count(&self.name).await
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
  async fn open_is_idempotent_and_registers_the_name() {
    let store = CacheStore::new(MemoryBackend::new());

    store.open("shopmart-static-v1").await.unwrap();
    store.open("shopmart-static-v1").await.unwrap();

    assert_eq!(
      store.partition_names().await.unwrap(),
      vec!["shopmart-static-v1"]
    );
  }

  #[tokio::test]
  async fn total_entries_sums_across_partitions() {
    let store = CacheStore::new(MemoryBackend::new());
    let a = store.open("a-v1").await.unwrap();
    let b = store.open("b-v1").await.unwrap();

    a.put(&key("/one"), &response("1")).await.unwrap();
    a.put(&key("/two"), &response("2")).await.unwrap();
    b.put(&key("/three"), &response("3")).await.unwrap();

    assert_eq!(store.total_entries().await.unwrap(), 3);
  }

  #[tokio::test]
  async fn clear_twice_leaves_zero_partitions_both_times() {
    let store = CacheStore::new(MemoryBackend::new());
    let partition = store.open("a-v1").await.unwrap();
    partition.put(&key("/one"), &response("1")).await.unwrap();
    store.open("b-v1").await.unwrap();

    assert_eq!(store.clear().await.unwrap(), 2);
    assert!(store.partition_names().await.unwrap().is_empty());
    assert_eq!(store.total_entries().await.unwrap(), 0);

    assert_eq!(store.clear().await.unwrap(), 0);
    assert!(store.partition_names().await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn delete_removes_one_entry_and_reports_presence() {
    let store = CacheStore::new(MemoryBackend::new());
    let partition = store.open("a-v1").await.unwrap();
    partition.put(&key("/one"), &response("1")).await.unwrap();
    partition.put(&key("/two"), &response("2")).await.unwrap();

    assert!(partition.delete(&key("/one")).await.unwrap());
    assert!(partition.get(&key("/one")).await.unwrap().is_none());
    assert_eq!(partition.len().await.unwrap(), 1);

    // Deleting the same key again reports its absence.
    assert!(!partition.delete(&key("/one")).await.unwrap());
    assert_eq!(
      partition.get(&key("/two")).await.unwrap().unwrap().body,
      b"2"
    );
  }

  #[tokio::test]
  async fn put_then_get_observes_the_write() {
    let store = CacheStore::new(MemoryBackend::new());
    let partition = store.open("a-v1").await.unwrap();
    let k = key("/");

    partition.put(&k, &response("first")).await.unwrap();
    assert_eq!(partition.get(&k).await.unwrap().unwrap().body, b"first");

    partition.put(&k, &response("second")).await.unwrap();
    assert_eq!(partition.get(&k).await.unwrap().unwrap().body, b"second");
    assert_eq!(partition.len().await.unwrap(), 1);
  }
}
