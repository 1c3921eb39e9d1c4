//! Worker lifecycle: install, activate, skip-waiting.
//!
//! A generation moves through `Installing → Installed → Activating →
//! Active`, and `Terminated` once superseded. Install pre-populates the
//! static partition from the asset manifest; activation garbage-collects
//! partitions from older generations, takes control of connected
//! clients, and broadcasts readiness. Until activation completes the
//! worker declines every request, so no strategy ever runs against a
//! generation that has not finished installing.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::clients::{ClientRegistry, Notice};
use crate::config::WorkerConfig;
use crate::error::LifecycleError;
use crate::http::Request;
use crate::net::Fetcher;
use crate::store::{CacheStore, Partition};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
  Installing = 0,
  Installed = 1,
  Activating = 2,
  Active = 3,
  Terminated = 4,
}

impl WorkerState {
  fn from_raw(raw: u8) -> Self {
    match raw {
      0 => WorkerState::Installing,
      1 => WorkerState::Installed,
      2 => WorkerState::Activating,
      3 => WorkerState::Active,
      _ => WorkerState::Terminated,
    }
  }
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      WorkerState::Installing => "installing",
      WorkerState::Installed => "installed",
      WorkerState::Activating => "activating",
      WorkerState::Active => "active",
      WorkerState::Terminated => "terminated",
    };
    f.write_str(s)
  }
}

/// Partition handles for the current generation, available once active.
#[derive(Clone)]
pub struct GenerationPartitions {
  pub statics: Partition,
  pub dynamic: Partition,
  pub images: Partition,
}

/// Outcome of pre-population. Failed assets are tolerated and install
/// proceeds, but they are reported rather than silently discarded.
#[derive(Debug, Default)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub failed: Vec<String>,
}

pub struct LifecycleManager {
  config: WorkerConfig,
  store: CacheStore,
  fetcher: Arc<dyn Fetcher>,
  clients: Arc<ClientRegistry>,
  state: AtomicU8,
  partitions: Mutex<Option<GenerationPartitions>>,
}

impl LifecycleManager {
  pub fn new(
    config: WorkerConfig,
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    clients: Arc<ClientRegistry>,
  ) -> Self {
    Self {
      config,
      store,
      fetcher,
      clients,
      state: AtomicU8::new(WorkerState::Installing as u8),
      partitions: Mutex::new(None),
    }
  }

  pub fn state(&self) -> WorkerState {
    WorkerState::from_raw(self.state.load(Ordering::SeqCst))
  }

  pub fn is_active(&self) -> bool {
    self.state() == WorkerState::Active
  }

  /// Partition handles of the current generation; `None` until activated.
  pub fn partitions(&self) -> Result<Option<GenerationPartitions>, LifecycleError> {
    Ok(self.partitions_slot()?.clone())
  }

  fn partitions_slot(
    &self,
  ) -> Result<MutexGuard<'_, Option<GenerationPartitions>>, LifecycleError> {
    self
      .partitions
      .lock()
      .map_err(|e| LifecycleError::Unavailable(format!("partition slot lock poisoned: {}", e)))
  }

  /// Advance the state machine, rejecting stale transitions atomically.
  fn transition(
    &self,
    expected: WorkerState,
    next: WorkerState,
    action: &'static str,
  ) -> Result<(), LifecycleError> {
    self
      .state
      .compare_exchange(
        expected as u8,
        next as u8,
        Ordering::SeqCst,
        Ordering::SeqCst,
      )
      .map_err(|actual| LifecycleError::InvalidState {
        action,
        state: WorkerState::from_raw(actual).to_string(),
      })?;
    Ok(())
  }

  /// Pre-populate the static partition with the critical asset manifest.
  ///
  /// Failing to open the partition aborts install; individual asset
  /// failures are logged and reported, and install proceeds without them.
  pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
    // Stay in Installing while pre-population runs; the state only
    // advances once the manifest has been attempted.
    if self.state() != WorkerState::Installing {
      return Err(LifecycleError::InvalidState {
        action: "install",
        state: self.state().to_string(),
      });
    }

    let static_name = self.config.static_partition();
    let statics = self
      .store
      .open(&static_name)
      .await
      .map_err(|source| LifecycleError::PartitionOpen {
        name: static_name.clone(),
        source,
      })?;

    let report = self.prepopulate(&statics).await;
    info!(
      "installed generation {} ({} cached, {} failed)",
      self.config.generation,
      report.cached.len(),
      report.failed.len()
    );

    self.transition(WorkerState::Installing, WorkerState::Installed, "install")?;
    Ok(report)
  }

  async fn prepopulate(&self, statics: &Partition) -> InstallReport {
    let attempts = self.config.precache.iter().map(|entry| async move {
      let url = match self.config.resolve(entry) {
        Ok(url) => url,
        Err(e) => {
          warn!("skipping unresolvable asset {}: {}", entry, e);
          return Err(entry.clone());
        }
      };

      let request = Request::get(url);
      let key = request.key();
      match self.fetcher.fetch(&request).await {
        Ok(response) if response.is_success() => match statics.put(&key, &response).await {
          Ok(()) => Ok(entry.clone()),
          Err(e) => {
            warn!("failed to store pre-cached asset {}: {}", entry, e);
            Err(entry.clone())
          }
        },
        Ok(response) => {
          warn!("pre-cache of {} returned {}", entry, response.status);
          Err(entry.clone())
        }
        Err(e) => {
          warn!("pre-cache of {} failed: {}", entry, e);
          Err(entry.clone())
        }
      }
    });

    let mut report = InstallReport::default();
    for outcome in futures::future::join_all(attempts).await {
      match outcome {
        Ok(entry) => report.cached.push(entry),
        Err(entry) => report.failed.push(entry),
      }
    }
    report
  }

  /// Destroy partitions from other generations, take control of all
  /// connected clients, and broadcast readiness.
  pub async fn activate(&self) -> Result<(), LifecycleError> {
    if self.state() == WorkerState::Active {
      return Ok(());
    }
    self.transition(WorkerState::Installed, WorkerState::Activating, "activate")?;

    if let Err(e) = self.finish_activation().await {
      // Roll back so a retry is possible.
      self.state.store(WorkerState::Installed as u8, Ordering::SeqCst);
      return Err(e);
    }

    self.transition(WorkerState::Activating, WorkerState::Active, "activate")?;
    info!("generation {} active", self.config.generation);
    Ok(())
  }

  async fn finish_activation(&self) -> Result<(), LifecycleError> {
    self.collect_stale_partitions().await?;

    let partitions = self.open_generation().await?;
    *self.partitions_slot()? = Some(partitions);

    self.clients.claim_all()?;
    self.clients.broadcast(Notice::Activated {
      message: self.config.activated_message.clone(),
    })?;
    Ok(())
  }

  async fn collect_stale_partitions(&self) -> Result<(), LifecycleError> {
    let keep = self.config.generation_set();
    let names = self
      .store
      .partition_names()
      .await
      .map_err(|e| LifecycleError::Unavailable(format!("cannot enumerate partitions: {}", e)))?;

    for name in names {
      if !keep.contains(&name) {
        info!("destroying stale partition {}", name);
        if let Err(e) = self.store.remove(&name).await {
          warn!("failed to destroy {}: {}", name, e);
        }
      }
    }
    Ok(())
  }

  async fn open_generation(&self) -> Result<GenerationPartitions, LifecycleError> {
    let open = |name: String| {
      let store = self.store.clone();
      async move {
        store
          .open(&name)
          .await
          .map_err(|source| LifecycleError::PartitionOpen { name, source })
      }
    };

    Ok(GenerationPartitions {
      statics: open(self.config.static_partition()).await?,
      dynamic: open(self.config.dynamic_partition()).await?,
      images: open(self.config.image_partition()).await?,
    })
  }

  /// Become active immediately instead of waiting for existing instances
  /// to wind down. Deliberate staged-rollout override: an open instance
  /// may find itself served by a different generation mid-session.
  pub async fn skip_waiting(&self) -> Result<(), LifecycleError> {
    self.activate().await
  }

  /// Mark this generation as superseded.
  pub fn terminate(&self) {
    self.state.store(WorkerState::Terminated as u8, Ordering::SeqCst);
  }
}
