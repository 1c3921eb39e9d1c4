//! Background reconciliation.
//!
//! When connectivity returns, the runtime raises a tagged signal and the
//! worker invokes the reconcile task registered for that tag; the
//! storefront flushes queued cart mutations under the `cart-sync` tag.
//! The task body (queue format, retry policy, remote endpoint) belongs
//! to whoever implements checkout; this module only guarantees the task
//! runs at least once per signal and that its failure never takes the
//! worker down.

use async_trait::async_trait;
use color_eyre::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tag raised when queued cart mutations should be flushed.
pub const CART_SYNC_TAG: &str = "cart-sync";

/// A deferred task run when connectivity is restored.
#[async_trait]
pub trait ReconcileTask: Send + Sync {
  async fn run(&self) -> Result<()>;
}

/// Registry of reconcile tasks by signal tag.
#[derive(Default)]
pub struct Reconciler {
  tasks: HashMap<String, Arc<dyn ReconcileTask>>,
}

impl Reconciler {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn register(&mut self, tag: impl Into<String>, task: Arc<dyn ReconcileTask>) {
    self.tasks.insert(tag.into(), task);
  }

  /// Invoke the task for a tag. Returns whether a task ran. Failures are
  /// logged and swallowed; an unrecognized tag is ignored.
  pub async fn signal(&self, tag: &str) -> bool {
    let Some(task) = self.tasks.get(tag) else {
      debug!("no reconcile task registered for tag {}", tag);
      return false;
    };

    if let Err(e) = task.run().await {
      warn!("reconcile task {} failed: {:#}", tag, e);
    }
    true
  }
}
