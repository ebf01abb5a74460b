//! The service agent: one explicit object owning every component, with the
//! host environment's entry points as methods rather than ambient globals.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{
  NewMutation, PartitionStore, RequestSignature, Resolution, SqliteStore,
};
use crate::classifier::{classify, RequestClass, RequestDescriptor};
use crate::config::AgentConfig;
use crate::lifecycle::{AgentState, LifecycleManager};
use crate::net::Fetcher;
use crate::notify::{NotificationDispatcher, NotificationHost, PushPayload, WindowHost};
use crate::offline;
use crate::strategy::StrategyExecutor;
use crate::sync::{DrainReport, SyncQueue};

/// Control messages accepted from the foreground application.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
  /// Drop the cache entry for a URL from the API partition. The only
  /// caller-initiated synchronous cache mutation.
  #[serde(rename = "CACHE_UPDATE")]
  CacheUpdate { url: String },
}

/// The background agent. Constructed once at process start; runs, dispatches
/// notifications and drains the sync queue with no application window open.
pub struct ServiceAgent<F: Fetcher> {
  config: AgentConfig,
  fetcher: F,
  store: Arc<dyn PartitionStore>,
  strategy: StrategyExecutor,
  queue: SyncQueue,
  lifecycle: LifecycleManager,
  dispatcher: NotificationDispatcher,
  state_rx: watch::Receiver<AgentState>,
}

impl<F: Fetcher> ServiceAgent<F> {
  pub fn new(
    config: AgentConfig,
    store: Arc<SqliteStore>,
    fetcher: F,
    notifications: Arc<dyn NotificationHost>,
    windows: Arc<dyn WindowHost>,
  ) -> Self {
    let partition_store: Arc<dyn PartitionStore> = store.clone();
    let strategy = StrategyExecutor::new(partition_store.clone(), &config);
    let queue = SyncQueue::new(store.clone(), config.max_replay_attempts);
    let (lifecycle, state_rx) = LifecycleManager::new(partition_store.clone(), &config);
    let dispatcher = NotificationDispatcher::new(notifications, windows);

    Self {
      config,
      fetcher,
      store: partition_store,
      strategy,
      queue,
      lifecycle,
      dispatcher,
      state_rx,
    }
  }

  pub fn state(&self) -> AgentState {
    self.lifecycle.state()
  }

  pub fn pending_mutations(&self) -> Result<u64> {
    self.queue.pending_count()
  }

  /// Install: create partitions and pre-populate the static one.
  pub async fn install(&self) -> Result<()> {
    let fetcher = &self.fetcher;
    self
      .lifecycle
      .install(|path| async move { fetcher.fetch(&RequestDescriptor::get(path)).await })
      .await
  }

  /// Activate: garbage-collect obsolete partitions and open the request gate.
  pub fn activate(&self) -> Result<()> {
    self.lifecycle.activate()
  }

  /// Intercept one outbound request. Blocks until activation's deletion pass
  /// has completed, then always resolves: a response from network, cache,
  /// the sync queue acknowledgement, or the synthesized 503.
  pub async fn handle_request(&self, request: &RequestDescriptor) -> Result<Resolution> {
    self.wait_until_active().await?;

    let class = classify(&self.config, request);

    if request.is_mutating() && matches!(class, RequestClass::ApiData | RequestClass::Other) {
      return self.handle_mutation(request).await;
    }

    let fetcher = &self.fetcher;
    Ok(
      self
        .strategy
        .execute(class, request, || fetcher.fetch(request))
        .await,
    )
  }

  /// A mutating call goes straight to the network; if the network is
  /// unreachable the mutation is queued durably and the caller gets an
  /// acknowledgement instead of an error.
  async fn handle_mutation(&self, request: &RequestDescriptor) -> Result<Resolution> {
    match self.fetcher.fetch(request).await {
      Ok(response) => Ok(Resolution::from_network(response)),
      Err(e) => {
        let path = request.path();
        let trigger = self.config.trigger_for(&path);
        debug!(endpoint = %request.url, trigger, error = %e, "Mutation unreachable; queuing");

        self.queue.enqueue(NewMutation {
          trigger: trigger.to_string(),
          method: request.method.clone(),
          endpoint: request.url.clone(),
          content_type: request
            .content_type
            .clone()
            .unwrap_or_else(|| "application/json".to_string()),
          payload: request.body.clone().unwrap_or_default(),
        })?;

        Ok(Resolution::queued(offline::queued_ack(&request.url)))
      }
    }
  }

  /// Invalidation channel: handle a control message from the foreground app.
  pub fn handle_message(&self, message: ControlMessage) -> Result<()> {
    match message {
      ControlMessage::CacheUpdate { url } => {
        let signature = RequestSignature::compute("GET", &url);
        let removed = self
          .store
          .delete(&self.config.api_partition_name(), &signature)?;
        info!(url = %url, removed, "Cache invalidation");
        Ok(())
      }
    }
  }

  /// Push entry point.
  pub fn handle_push(&self, raw: &[u8]) -> Result<()> {
    self.dispatcher.on_push(raw)
  }

  /// Notification interaction entry point.
  pub fn handle_notification_click(&self, action: &str, payload: &PushPayload) -> Result<()> {
    self.dispatcher.on_interaction(action, payload)
  }

  /// Sync entry point: drain the queue for one named trigger.
  pub async fn handle_sync(&self, trigger: &str) -> Result<DrainReport> {
    if !self.config.trigger_names().contains(&trigger) {
      warn!(trigger, "Unknown sync trigger; nothing to drain");
      return Ok(DrainReport::default());
    }

    let fetcher = &self.fetcher;
    self
      .queue
      .drain(trigger, |mutation| async move {
        fetcher.replay(&mutation).await
      })
      .await
  }

  /// Connectivity-restoration signal: probe the backend and, when reachable,
  /// drain every configured trigger.
  pub async fn on_connectivity(&self) -> Result<()> {
    if !self.fetcher.probe().await {
      debug!("Backend still unreachable; keeping queue");
      return Ok(());
    }

    for trigger in self.config.trigger_names() {
      let trigger = trigger.to_string();
      self.handle_sync(&trigger).await?;
    }

    Ok(())
  }

  async fn wait_until_active(&self) -> Result<()> {
    let mut state_rx = self.state_rx.clone();
    state_rx
      .wait_for(|state| *state == AgentState::Active)
      .await
      .map_err(|e| eyre!("Lifecycle channel closed: {}", e))?;

    Ok(())
  }
}
