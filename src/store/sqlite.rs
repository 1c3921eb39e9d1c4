//! SQLite storage backend.
//!
//! Persists partitions across worker runs. One `entries` row per cached
//! response, keyed by partition name + SHA256 of the request key; the
//! readable key is kept alongside for inspection.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::StorageBackend;
use crate::error::StorageError;
use crate::http::{RequestKey, StoredResponse};

/// Schema for the partition store.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    key_hash TEXT NOT NULL,
    key_text TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (partition, key_hash),
    FOREIGN KEY (partition) REFERENCES partitions(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_entries_partition ON entries(partition);
"#;

pub struct SqliteBackend {
  conn: Mutex<Connection>,
}

impl SqliteBackend {
  /// Open the store at the default location.
  pub fn open() -> Result<Self, StorageError> {
    Self::open_at(&Self::default_path()?)
  }

  /// Open the store at an explicit path, creating parent directories.
  pub fn open_at(path: &Path) -> Result<Self, StorageError> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| StorageError::Unavailable(format!("cannot create cache directory: {}", e)))?;
    }

    let conn = Connection::open(path).map_err(map_sqlite_err)?;
    Self::from_connection(conn)
  }

  /// Open a throwaway in-memory store.
  pub fn open_in_memory() -> Result<Self, StorageError> {
    let conn = Connection::open_in_memory().map_err(map_sqlite_err)?;
    Self::from_connection(conn)
  }

  fn from_connection(conn: Connection) -> Result<Self, StorageError> {
    conn
      .execute_batch("PRAGMA foreign_keys=ON;")
      .map_err(map_sqlite_err)?;
    conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Default database path.
  pub fn default_path() -> Result<PathBuf, StorageError> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| StorageError::Unavailable("could not determine data directory".to_string()))?;

    Ok(data_dir.join("shopworker").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StorageError> {
    self
      .conn
      .lock()
      .map_err(|e| StorageError::Unavailable(format!("lock poisoned: {}", e)))
  }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
  async fn create_partition(&self, name: &str) -> Result<(), StorageError> {
    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(map_sqlite_err)?;
    Ok(())
  }

  async fn put(
    &self,
    partition: &str,
    key: &RequestKey,
    response: &StoredResponse,
  ) -> Result<(), StorageError> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| StorageError::Corrupt(format!("cannot encode headers: {}", e)))?;

    let conn = self.lock()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(map_sqlite_err)?;
    conn
      .execute(
        "INSERT OR REPLACE INTO entries (partition, key_hash, key_text, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          partition,
          key.hash(),
          key.as_str(),
          response.status,
          headers,
          response.body,
          response.cached_at.to_rfc3339(),
        ],
      )
      .map_err(map_sqlite_err)?;
    Ok(())
  }

  async fn get(
    &self,
    partition: &str,
    key: &RequestKey,
  ) -> Result<Option<StoredResponse>, StorageError> {
    let conn = self.lock()?;
    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, cached_at FROM entries
         WHERE partition = ? AND key_hash = ?",
        params![partition, key.hash()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(map_sqlite_err)?;

    let Some((status, headers, body, cached_at)) = row else {
      return Ok(None);
    };

    let headers: Vec<(String, String)> = serde_json::from_str(&headers)
      .map_err(|e| StorageError::Corrupt(format!("cannot decode headers: {}", e)))?;
    let cached_at = parse_datetime(&cached_at)?;

    Ok(Some(StoredResponse::from_parts(
      status, headers, body, cached_at,
    )))
  }

  async fn delete(&self, partition: &str, key: &RequestKey) -> Result<bool, StorageError> {
    let conn = self.lock()?;
    let changed = conn
      .execute(
        "DELETE FROM entries WHERE partition = ? AND key_hash = ?",
        params![partition, key.hash()],
      )
      .map_err(map_sqlite_err)?;
    Ok(changed > 0)
  }

  async fn drop_partition(&self, name: &str) -> Result<bool, StorageError> {
    let conn = self.lock()?;
    let changed = conn
      .execute("DELETE FROM partitions WHERE name = ?", params![name])
      .map_err(map_sqlite_err)?;
    Ok(changed > 0)
  }

  async fn list_partitions(&self) -> Result<Vec<String>, StorageError> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY rowid")
      .map_err(map_sqlite_err)?;
    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(map_sqlite_err)?
      .collect::<Result<Vec<String>, _>>()
      .map_err(map_sqlite_err)?;
    Ok(names)
  }

  async fn entry_count(&self, partition: &str) -> Result<usize, StorageError> {
    let conn = self.lock()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM entries WHERE partition = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(map_sqlite_err)?;
    Ok(count as usize)
  }
}

fn map_sqlite_err(e: rusqlite::Error) -> StorageError {
  match &e {
    rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::DiskFull => {
      StorageError::QuotaExceeded
    }
    _ => StorageError::Unavailable(e.to_string()),
  }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StorageError> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| StorageError::Corrupt(format!("bad timestamp '{}': {}", s, e)))
}
