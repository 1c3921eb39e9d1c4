//! Connected application instances.
//!
//! The worker keeps a registry of open application instances so that
//! activation can take control of them without a reload and push the
//! ready-for-offline notification. Notices travel over per-client
//! unbounded channels; a client that went away is pruned on the next
//! broadcast. A poisoned registry lock surfaces as a lifecycle error
//! rather than a panic.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::LifecycleError;

/// Notification pushed to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum Notice {
  /// Activation finished; the application can work offline now.
  #[serde(rename = "SW_ACTIVATED")]
  Activated { message: String },
}

/// A client's end of the registry: its id and the notice stream.
pub struct ClientConnection {
  pub id: u64,
  pub notices: mpsc::UnboundedReceiver<Notice>,
}

struct ClientEntry {
  id: u64,
  controlled: bool,
  tx: mpsc::UnboundedSender<Notice>,
}

#[derive(Default)]
pub struct ClientRegistry {
  next_id: AtomicU64,
  clients: Mutex<Vec<ClientEntry>>,
}

impl ClientRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  fn entries(&self) -> Result<MutexGuard<'_, Vec<ClientEntry>>, LifecycleError> {
    self
      .clients
      .lock()
      .map_err(|e| LifecycleError::Unavailable(format!("client registry lock poisoned: {}", e)))
  }

  /// Register an application instance. New clients start uncontrolled:
  /// their requests are not intercepted until the worker claims them.
  pub fn connect(&self) -> Result<ClientConnection, LifecycleError> {
    let id = self.next_id.fetch_add(1, Ordering::SeqCst);
    let (tx, rx) = mpsc::unbounded_channel();
    self.entries()?.push(ClientEntry {
      id,
      controlled: false,
      tx,
    });
    Ok(ClientConnection { id, notices: rx })
  }

  /// Take control of every connected client.
  pub fn claim_all(&self) -> Result<(), LifecycleError> {
    for client in self.entries()?.iter_mut() {
      if !client.controlled {
        debug!("claiming client {}", client.id);
        client.controlled = true;
      }
    }
    Ok(())
  }

  /// Push a notice to every connected client, pruning any that are gone.
  pub fn broadcast(&self, notice: Notice) -> Result<(), LifecycleError> {
    self
      .entries()?
      .retain(|client| client.tx.send(notice.clone()).is_ok());
    Ok(())
  }

  pub fn connected(&self) -> Result<usize, LifecycleError> {
    Ok(self.entries()?.len())
  }

  pub fn controlled(&self) -> Result<usize, LifecycleError> {
    Ok(self.entries()?.iter().filter(|c| c.controlled).count())
  }
}
