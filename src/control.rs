//! Control channel protocol.
//!
//! The foreground application steers the worker through a small
//! request/reply protocol: query the aggregate cache size, clear every
//! partition, or force immediate activation. Every request gets exactly
//! one reply: malformed input and internal failures produce a
//! structured error reply, never a dropped channel.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::ProtocolError;

/// Operations the foreground application may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlRequest {
  /// Force immediate activation of a newly installed generation.
  #[serde(rename = "SKIP_WAITING")]
  SkipWaiting,
  /// Total entry count across all partitions (entries, not bytes).
  #[serde(rename = "GET_CACHE_SIZE")]
  GetCacheSize,
  /// Destroy every partition, current generation included.
  #[serde(rename = "CLEAR_CACHE")]
  ClearCache,
}

impl ControlRequest {
  /// Parse a wire message, distinguishing a missing/garbled `type` field
  /// from a well-formed message of an unknown type.
  pub fn parse(message: &Value) -> Result<Self, ProtocolError> {
    let kind = message
      .get("type")
      .and_then(Value::as_str)
      .ok_or_else(|| ProtocolError::Malformed("missing \"type\" field".to_string()))?;

    serde_json::from_value(message.clone())
      .map_err(|_| ProtocolError::UnknownType(kind.to_string()))
  }
}

/// Reply to a control request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlReply {
  CacheSize {
    #[serde(rename = "cacheSize")]
    cache_size: usize,
  },
  Success {
    success: bool,
  },
  Error {
    error: String,
  },
}

impl ControlReply {
  pub fn success() -> Self {
    ControlReply::Success { success: true }
  }

  pub fn cache_size(cache_size: usize) -> Self {
    ControlReply::CacheSize { cache_size }
  }

  pub fn error(message: impl std::fmt::Display) -> Self {
    ControlReply::Error {
      error: message.to_string(),
    }
  }
}

/// A control message paired with its reply channel.
#[derive(Debug)]
pub struct ControlEnvelope {
  pub message: Value,
  pub reply: oneshot::Sender<ControlReply>,
}
