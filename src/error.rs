//! Error types for the caching worker.
//!
//! Each subsystem has its own error kind so callers can tell a storage
//! quota failure apart from a network timeout or a malformed control
//! message. Strategies are required to terminate in a response for every
//! kind except a route request with no network, no cached entry, and no
//! shell, the one permitted hard failure.

use thiserror::Error;

/// Errors from the partition store.
#[derive(Debug, Error)]
pub enum StorageError {
  /// The backing store ran out of space. Never silently swallowed by the
  /// store itself; strategies degrade to network-only when they see it.
  #[error("storage quota exceeded")]
  QuotaExceeded,

  /// The store could not be reached or a statement failed.
  #[error("partition store unavailable: {0}")]
  Unavailable(String),

  /// A stored entry could not be decoded.
  #[error("corrupt cache entry: {0}")]
  Corrupt(String),
}

/// Errors from the network fetcher.
#[derive(Debug, Error)]
pub enum NetworkError {
  #[error("network fetch timed out")]
  Timeout,

  #[error("network fetch failed: {0}")]
  Transport(String),
}

/// Errors from the control channel.
#[derive(Debug, Error)]
pub enum ProtocolError {
  #[error("malformed control message: {0}")]
  Malformed(String),

  #[error("unknown control message type: {0}")]
  UnknownType(String),
}

/// Errors from install/activate transitions.
#[derive(Debug, Error)]
pub enum LifecycleError {
  /// The requested transition is not valid from the current state.
  #[error("cannot {action} while {state}")]
  InvalidState { action: &'static str, state: String },

  /// Opening a generation partition failed. Fatal to install: the worker
  /// generation is discarded rather than activated half-provisioned.
  #[error("failed to open partition {name}: {source}")]
  PartitionOpen {
    name: String,
    #[source]
    source: StorageError,
  },

  /// A lock guarding worker state was poisoned by a panicking task.
  #[error("lifecycle state unavailable: {0}")]
  Unavailable(String),
}

/// Any error the worker can surface to a caller.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Storage(#[from] StorageError),

  #[error(transparent)]
  Network(#[from] NetworkError),

  #[error(transparent)]
  Protocol(#[from] ProtocolError),

  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_includes_kind_detail() {
    let err = StorageError::Unavailable("db locked".to_string());
    assert!(err.to_string().contains("db locked"));

    let err = Error::from(NetworkError::Timeout);
    assert!(err.to_string().contains("timed out"));
  }
}
