//! Install/activate lifecycle and partition garbage collection.
//!
//! The install → activate transition is the one hard ordering barrier in the
//! agent: request interception waits on the published state reaching
//! `Active`, so old- and new-schema writes never overlap.

use color_eyre::Result;
use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{PartitionStore, RequestSignature, StoredResponse};
use crate::config::AgentConfig;

/// Agent lifecycle states, in order. `Active` is terminal until the process
/// is replaced by a newer version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
  Installing,
  Installed,
  Activating,
  Active,
}

/// Owns version transitions and the partitions they create and destroy.
pub struct LifecycleManager {
  store: Arc<dyn PartitionStore>,
  static_partition: String,
  api_partition: String,
  manifest: Vec<String>,
  state_tx: watch::Sender<AgentState>,
}

impl LifecycleManager {
  /// Create the manager and the state channel interception gates on.
  pub fn new(store: Arc<dyn PartitionStore>, config: &AgentConfig) -> (Self, watch::Receiver<AgentState>) {
    let (state_tx, state_rx) = watch::channel(AgentState::Installing);

    let manager = Self {
      store,
      static_partition: config.static_partition_name(),
      api_partition: config.api_partition_name(),
      manifest: config.install_manifest.clone(),
      state_tx,
    };

    (manager, state_rx)
  }

  pub fn state(&self) -> AgentState {
    *self.state_tx.borrow()
  }

  /// Install: create both partitions and pre-populate the static one from
  /// the manifest. Individual manifest fetch failures are logged and
  /// non-fatal; the transition to `Installed` waits only for every fetch to
  /// settle, success or not.
  pub async fn install<F, Fut>(&self, fetcher: F) -> Result<()>
  where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    self.state_tx.send_replace(AgentState::Installing);
    info!(partition = %self.static_partition, "Installing");

    self.store.ensure_partition(&self.static_partition)?;
    // The API partition starts empty; network-first fills it as it goes
    self.store.ensure_partition(&self.api_partition)?;

    let fetches = self.manifest.iter().map(|path| {
      let path = path.clone();
      let fut = fetcher(path.clone());
      async move { (path, fut.await) }
    });

    for (path, result) in join_all(fetches).await {
      match result {
        Ok(response) if response.is_success() => {
          let signature = RequestSignature::compute("GET", &path);
          if let Err(e) = self.store.put(&self.static_partition, &signature, &response) {
            warn!(path = %path, error = %e, "Failed to store manifest entry");
          }
        }
        Ok(response) => {
          warn!(path = %path, status = response.status, "Manifest fetch rejected; skipping");
        }
        Err(e) => {
          warn!(path = %path, error = %e, "Manifest fetch failed; skipping");
        }
      }
    }

    self.state_tx.send_replace(AgentState::Installed);
    info!("Install complete");

    Ok(())
  }

  /// Activate: delete every partition the current versions do not expect,
  /// then open the gate for request interception.
  pub fn activate(&self) -> Result<()> {
    self.state_tx.send_replace(AgentState::Activating);

    let expected = [self.static_partition.as_str(), self.api_partition.as_str()];
    for partition in self.store.list_partitions()? {
      if !expected.contains(&partition.as_str()) {
        info!(partition = %partition, "Deleting obsolete partition");
        self.store.delete_partition(&partition)?;
      }
    }

    self.state_tx.send_replace(AgentState::Active);
    info!("Agent active");

    Ok(())
  }
}
