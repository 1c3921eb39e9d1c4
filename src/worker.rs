//! The caching worker.
//!
//! Ties the policy selector, strategy engine, lifecycle manager, control
//! channel, and reconciler together behind two surfaces: the in-process
//! `intercept` call used at the interception boundary, and a channel-fed
//! event loop (`run`) for out-of-band callers. Every fetch event runs in
//! its own task, so no request blocks another.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::clients::{ClientConnection, ClientRegistry};
use crate::config::WorkerConfig;
use crate::control::{ControlEnvelope, ControlReply, ControlRequest};
use crate::error::{Error, LifecycleError};
use crate::http::{InterceptResult, Request, RequestKey};
use crate::lifecycle::{InstallReport, LifecycleManager, WorkerState};
use crate::net::Fetcher;
use crate::policy::{PolicySelector, RequestClass};
use crate::store::CacheStore;
use crate::strategy::StrategyEngine;
use crate::sync::Reconciler;

/// Events the worker loop consumes.
#[derive(Debug)]
pub enum WorkerEvent {
  /// An outbound request offered for interception.
  Fetch {
    request: Request,
    reply: oneshot::Sender<Result<InterceptResult, Error>>,
  },
  /// A control-channel message with its reply channel.
  Control(ControlEnvelope),
  /// Connectivity came back; run the reconcile task for `tag`.
  ConnectivityRestored { tag: String },
}

#[derive(Clone)]
pub struct Worker {
  inner: Arc<WorkerInner>,
}

struct WorkerInner {
  store: CacheStore,
  selector: PolicySelector,
  engine: StrategyEngine,
  lifecycle: LifecycleManager,
  clients: Arc<ClientRegistry>,
  reconciler: Reconciler,
  shell_key: RequestKey,
}

impl Worker {
  pub fn new(
    config: WorkerConfig,
    store: CacheStore,
    fetcher: Arc<dyn Fetcher>,
    reconciler: Reconciler,
  ) -> color_eyre::Result<Self> {
    let shell_key = Request::get(config.shell_url()?).key();
    let selector = PolicySelector::new(&config);
    let clients = Arc::new(ClientRegistry::new());
    let engine = StrategyEngine::new(Arc::clone(&fetcher));
    let lifecycle = LifecycleManager::new(config, store.clone(), fetcher, Arc::clone(&clients));

    Ok(Self {
      inner: Arc::new(WorkerInner {
        store,
        selector,
        engine,
        lifecycle,
        clients,
        reconciler,
        shell_key,
      }),
    })
  }

  pub fn state(&self) -> WorkerState {
    self.inner.lifecycle.state()
  }

  /// Register an application instance with the worker.
  pub fn connect_client(&self) -> Result<ClientConnection, LifecycleError> {
    self.inner.clients.connect()
  }

  pub async fn install(&self) -> Result<InstallReport, LifecycleError> {
    self.inner.lifecycle.install().await
  }

  pub async fn activate(&self) -> Result<(), LifecycleError> {
    self.inner.lifecycle.activate().await
  }

  /// Offer a request to the caching layer.
  ///
  /// Returns a response, `Unavailable` when a handled request has nothing
  /// to serve, or `Bypass` to let the request pass through untouched.
  /// Nothing is intercepted until the worker has activated.
  pub async fn intercept(&self, request: &Request) -> Result<InterceptResult, Error> {
    if !self.inner.lifecycle.is_active() {
      return Ok(InterceptResult::Bypass);
    }
    let partitions = match self.inner.lifecycle.partitions() {
      Ok(Some(partitions)) => partitions,
      Ok(None) => return Ok(InterceptResult::Bypass),
      Err(e) => {
        // Decline rather than fail; the application falls through to
        // the network untouched.
        warn!("cannot intercept: {}", e);
        return Ok(InterceptResult::Bypass);
      }
    };

    match self.inner.selector.classify(request) {
      RequestClass::Bypass => Ok(InterceptResult::Bypass),
      RequestClass::Image => Ok(InterceptResult::Response(
        self
          .inner
          .engine
          .stale_while_revalidate(request, &partitions.images)
          .await,
      )),
      RequestClass::Static => Ok(
        match self.inner.engine.cache_first(request, &partitions.statics).await {
          Some(response) => InterceptResult::Response(response),
          None => InterceptResult::Unavailable,
        },
      ),
      RequestClass::Route => self
        .inner
        .engine
        .network_first(
          request,
          &partitions.dynamic,
          Some((&partitions.statics, &self.inner.shell_key)),
        )
        .await
        .map(InterceptResult::Response),
    }
  }

  /// Handle one control message. Always produces a reply.
  pub async fn handle_control_message(&self, message: Value) -> ControlReply {
    let request = match ControlRequest::parse(&message) {
      Ok(request) => request,
      Err(e) => return ControlReply::error(e),
    };

    match request {
      ControlRequest::SkipWaiting => match self.inner.lifecycle.skip_waiting().await {
        Ok(()) => ControlReply::success(),
        Err(e) => ControlReply::error(e),
      },
      ControlRequest::GetCacheSize => match self.inner.store.total_entries().await {
        Ok(total) => ControlReply::cache_size(total),
        Err(e) => ControlReply::error(e),
      },
      ControlRequest::ClearCache => match self.inner.store.clear().await {
        Ok(dropped) => {
          debug!("cleared {} partitions", dropped);
          ControlReply::success()
        }
        Err(e) => ControlReply::error(e),
      },
    }
  }

  /// Run the reconcile task registered for a connectivity-restore tag.
  pub async fn connectivity_restored(&self, tag: &str) -> bool {
    self.inner.reconciler.signal(tag).await
  }

  /// Spawn the event loop, returning a handle for out-of-band callers.
  pub fn spawn(self) -> WorkerHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(self.run(rx));
    WorkerHandle { tx }
  }

  /// Consume events until every handle is dropped. Fetch and control
  /// events are dispatched on their own tasks.
  pub async fn run(self, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
      match event {
        WorkerEvent::Fetch { request, reply } => {
          let worker = self.clone();
          tokio::spawn(async move {
            let _ = reply.send(worker.intercept(&request).await);
          });
        }
        WorkerEvent::Control(envelope) => {
          let worker = self.clone();
          tokio::spawn(async move {
            let reply = worker.handle_control_message(envelope.message).await;
            let _ = envelope.reply.send(reply);
          });
        }
        WorkerEvent::ConnectivityRestored { tag } => {
          let worker = self.clone();
          tokio::spawn(async move {
            worker.connectivity_restored(&tag).await;
          });
        }
      }
    }
  }
}

/// Cheap-to-clone sender side of the worker event loop.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHandle {
  /// Offer a request for interception. A terminated worker declines.
  pub async fn fetch(&self, request: Request) -> Result<InterceptResult, Error> {
    let (tx, rx) = oneshot::channel();
    if self.tx.send(WorkerEvent::Fetch { request, reply: tx }).is_err() {
      return Ok(InterceptResult::Bypass);
    }
    match rx.await {
      Ok(result) => result,
      Err(_) => Ok(InterceptResult::Bypass),
    }
  }

  /// Send a control message and await the reply. Exactly one reply comes
  /// back even when the worker is gone or fails internally.
  pub async fn control(&self, message: Value) -> ControlReply {
    let (tx, rx) = oneshot::channel();
    let envelope = ControlEnvelope { message, reply: tx };
    if self.tx.send(WorkerEvent::Control(envelope)).is_err() {
      return ControlReply::error("worker terminated");
    }
    match rx.await {
      Ok(reply) => reply,
      Err(_) => ControlReply::error("worker dropped the reply channel"),
    }
  }

  /// Raise a connectivity-restored signal.
  pub fn connectivity_restored(&self, tag: &str) {
    let _ = self.tx.send(WorkerEvent::ConnectivityRestored {
      tag: tag.to_string(),
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clients::Notice;
  use crate::http::StoredResponse;
  use crate::store::MemoryBackend;
  use crate::sync::{ReconcileTask, CART_SYNC_TAG};
  use crate::testutil::{get, ok, FetchOutcome, ScriptedFetcher};
  use async_trait::async_trait;
  use serde_json::json;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  fn worker_with(
    fetcher: Arc<ScriptedFetcher>,
    reconciler: Reconciler,
  ) -> (Worker, CacheStore) {
    let store = CacheStore::new(MemoryBackend::new());
    let worker = Worker::new(WorkerConfig::default(), store.clone(), fetcher, reconciler).unwrap();
    (worker, store)
  }

  fn manifest_outcomes() -> Vec<FetchOutcome> {
    vec![
      FetchOutcome::Respond(ok("app shell")),
      FetchOutcome::Respond(ok("index")),
      FetchOutcome::Respond(ok("icon")),
      FetchOutcome::Respond(ok("manifest")),
    ]
  }

  async fn activated_worker(
    mut extra: Vec<FetchOutcome>,
  ) -> (Worker, CacheStore, Arc<ScriptedFetcher>) {
    let mut outcomes = manifest_outcomes();
    outcomes.append(&mut extra);
    let fetcher = Arc::new(ScriptedFetcher::new(outcomes));
    let (worker, store) = worker_with(Arc::clone(&fetcher), Reconciler::new());
    worker.install().await.unwrap();
    worker.activate().await.unwrap();
    (worker, store, fetcher)
  }

  #[tokio::test]
  async fn nothing_is_intercepted_before_activation() {
    let (worker, _store) = worker_with(
      Arc::new(ScriptedFetcher::new(vec![])),
      Reconciler::new(),
    );

    let result = worker.intercept(&get("http://localhost:5173/")).await.unwrap();
    assert_eq!(result, InterceptResult::Bypass);

    worker.install().await.unwrap();
    let result = worker.intercept(&get("http://localhost:5173/")).await.unwrap();
    assert_eq!(result, InterceptResult::Bypass);
  }

  #[tokio::test]
  async fn non_get_requests_pass_straight_through() {
    let (worker, store, fetcher) = activated_worker(vec![]).await;
    let before = store.total_entries().await.unwrap();
    let calls_before = fetcher.calls();

    let request = Request::new(
      reqwest::Method::POST,
      url::Url::parse("http://localhost:5173/cart").unwrap(),
    );
    let result = worker.intercept(&request).await.unwrap();

    assert_eq!(result, InterceptResult::Bypass);
    assert_eq!(store.total_entries().await.unwrap(), before);
    assert_eq!(fetcher.calls(), calls_before);
  }

  #[tokio::test]
  async fn unmatched_urls_pass_straight_through() {
    let (worker, _store, _fetcher) = activated_worker(vec![]).await;

    let result = worker
      .intercept(&get("http://localhost:5173/api/orders"))
      .await
      .unwrap();
    assert_eq!(result, InterceptResult::Bypass);
  }

  #[tokio::test]
  async fn static_requests_are_cached_under_the_exact_url() {
    let (worker, store, fetcher) =
      activated_worker(vec![FetchOutcome::Respond(ok("bundle bytes"))]).await;
    let calls_after_install = fetcher.calls();

    let request = get("http://localhost:5173/assets/app.js");
    let first = worker.intercept(&request).await.unwrap();
    assert_eq!(first.response().unwrap().body, b"bundle bytes");
    assert_eq!(fetcher.calls(), calls_after_install + 1);

    let statics = store.open("shopmart-static-v1").await.unwrap();
    assert!(statics.get(&request.key()).await.unwrap().is_some());

    // Second identical request is a cache hit with zero network calls.
    let second = worker.intercept(&request).await.unwrap();
    assert_eq!(second.response().unwrap().body, b"bundle bytes");
    assert_eq!(fetcher.calls(), calls_after_install + 1);
  }

  #[tokio::test]
  async fn offline_route_falls_back_to_the_precached_shell() {
    // Manifest succeeds during install; every later fetch fails.
    let (worker, _store, _fetcher) = activated_worker(vec![FetchOutcome::Fail]).await;

    let result = worker.intercept(&get("http://localhost:5173/")).await.unwrap();
    assert_eq!(result.response().unwrap().body, b"app shell");
  }

  #[tokio::test]
  async fn image_requests_use_the_image_partition() {
    let (worker, store, _fetcher) =
      activated_worker(vec![FetchOutcome::Respond(ok("pixels"))]).await;

    let request = get("https://picsum.photos/400/300");
    let result = worker.intercept(&request).await.unwrap();
    assert_eq!(result.response().unwrap().body, b"pixels");

    let images = store.open("shopmart-images-v1").await.unwrap();
    assert!(images.get(&request.key()).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn cache_size_and_clear_flow_through_the_control_channel() {
    let (worker, _store, _fetcher) = activated_worker(vec![]).await;
    let handle = worker.spawn();

    let reply = handle.control(json!({"type": "GET_CACHE_SIZE"})).await;
    assert_eq!(reply, ControlReply::cache_size(4));

    let reply = handle.control(json!({"type": "CLEAR_CACHE"})).await;
    assert_eq!(reply, ControlReply::success());

    let reply = handle.control(json!({"type": "GET_CACHE_SIZE"})).await;
    assert_eq!(reply, ControlReply::cache_size(0));

    // Clearing an already-empty store still succeeds.
    let reply = handle.control(json!({"type": "CLEAR_CACHE"})).await;
    assert_eq!(reply, ControlReply::success());
  }

  #[tokio::test]
  async fn activation_notifies_clients_connected_through_the_worker() {
    let (worker, _store) = worker_with(
      Arc::new(ScriptedFetcher::new(manifest_outcomes())),
      Reconciler::new(),
    );
    let mut connection = worker.connect_client().unwrap();

    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let notice = connection.notices.recv().await.unwrap();
    assert!(matches!(notice, Notice::Activated { .. }));
  }

  #[tokio::test]
  async fn skip_waiting_message_forces_activation() {
    let (worker, _store) = worker_with(
      Arc::new(ScriptedFetcher::new(manifest_outcomes())),
      Reconciler::new(),
    );
    worker.install().await.unwrap();
    assert_eq!(worker.state(), WorkerState::Installed);

    let handle = worker.clone().spawn();
    let reply = handle.control(json!({"type": "SKIP_WAITING"})).await;

    assert_eq!(reply, ControlReply::success());
    assert_eq!(worker.state(), WorkerState::Active);
  }

  #[tokio::test]
  async fn malformed_control_messages_still_get_a_reply() {
    let (worker, _store, _fetcher) = activated_worker(vec![]).await;
    let handle = worker.spawn();

    let reply = handle.control(json!({"cmd": "CLEAR_CACHE"})).await;
    assert!(matches!(reply, ControlReply::Error { .. }));

    let reply = handle.control(json!({"type": "DEFRAG"})).await;
    assert!(matches!(reply, ControlReply::Error { .. }));
  }

  struct CountingTask {
    runs: AtomicUsize,
  }

  #[async_trait]
  impl ReconcileTask for CountingTask {
    async fn run(&self) -> color_eyre::Result<()> {
      self.runs.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  #[tokio::test]
  async fn connectivity_signal_runs_the_registered_task() {
    let task = Arc::new(CountingTask {
      runs: AtomicUsize::new(0),
    });
    let mut reconciler = Reconciler::new();
    reconciler.register(CART_SYNC_TAG, task.clone());

    let (worker, _store) = worker_with(
      Arc::new(ScriptedFetcher::new(manifest_outcomes())),
      reconciler,
    );
    worker.install().await.unwrap();
    worker.activate().await.unwrap();

    let handle = worker.spawn();
    handle.connectivity_restored(CART_SYNC_TAG);

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(task.runs.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn fetch_events_are_answered_through_the_handle() {
    let (worker, _store, _fetcher) =
      activated_worker(vec![FetchOutcome::Respond(StoredResponse::new(
        200,
        vec![],
        b"fresh cart".to_vec(),
      ))])
      .await;
    let handle = worker.spawn();

    let result = handle.fetch(get("http://localhost:5173/cart")).await.unwrap();
    assert_eq!(result.response().unwrap().body, b"fresh cart");
  }
}
