//! Deferred sync queue: durable mutation descriptors replayed in FIFO order
//! when connectivity returns.

use color_eyre::Result;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{MutationStore, NewMutation, PendingMutation, StoredResponse};

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  /// Replayed successfully and removed from the queue
  pub replayed: usize,
  /// Failed and retained for a future drain
  pub retained: usize,
  /// Dropped after exceeding the configured attempt cap
  pub evicted: usize,
  /// True when another drain was already in progress and this call did nothing
  pub skipped: bool,
}

impl DrainReport {
  fn skipped() -> Self {
    Self {
      skipped: true,
      ..Self::default()
    }
  }
}

/// Durable FIFO queue of mutations awaiting replay.
///
/// The queue is a single sequential resource: one mutation replays at a time
/// in enqueue order, and a drain already in progress causes re-entrant calls
/// to return immediately.
pub struct SyncQueue {
  store: Arc<dyn MutationStore>,
  drain_lock: Mutex<()>,
  /// None means indefinite retry
  max_attempts: Option<u32>,
}

impl SyncQueue {
  pub fn new(store: Arc<dyn MutationStore>, max_attempts: Option<u32>) -> Self {
    Self {
      store,
      drain_lock: Mutex::new(()),
      max_attempts,
    }
  }

  /// Append a mutation durably. Storage failure is returned to the caller:
  /// a write the user believes was queued must not be silently discarded.
  pub fn enqueue(&self, mutation: NewMutation) -> Result<i64> {
    let id = self.store.enqueue(&mutation)?;
    info!(
      id,
      trigger = %mutation.trigger,
      endpoint = %mutation.endpoint,
      "Mutation queued for replay"
    );

    Ok(id)
  }

  pub fn pending_count(&self) -> Result<u64> {
    self.store.pending_count()
  }

  /// Replay every mutation pending under `trigger`, one at a time in FIFO
  /// order. A successful replay (2xx) removes the mutation; any failure
  /// leaves it for the next drain and moves on, so one stuck mutation never
  /// blocks the rest.
  pub async fn drain<F, Fut>(&self, trigger: &str, replayer: F) -> Result<DrainReport>
  where
    F: Fn(PendingMutation) -> Fut,
    Fut: Future<Output = Result<StoredResponse>>,
  {
    let _guard = match self.drain_lock.try_lock() {
      Ok(guard) => guard,
      Err(_) => {
        debug!(trigger, "Drain already in progress; skipping");
        return Ok(DrainReport::skipped());
      }
    };

    let pending = self.store.pending(trigger)?;
    if pending.is_empty() {
      return Ok(DrainReport::default());
    }

    info!(trigger, count = pending.len(), "Draining pending mutations");
    let mut report = DrainReport::default();

    for mutation in pending {
      let id = mutation.id;
      let endpoint = mutation.endpoint.clone();

      let replayed = match replayer(mutation).await {
        Ok(response) if response.is_success() => true,
        Ok(response) => {
          debug!(id, endpoint = %endpoint, status = response.status, "Replay rejected");
          false
        }
        Err(e) => {
          debug!(id, endpoint = %endpoint, error = %e, "Replay failed");
          false
        }
      };

      if replayed {
        self.store.remove(id)?;
        report.replayed += 1;
        continue;
      }

      let attempts = self.store.record_attempt(id)?;
      match self.max_attempts {
        Some(cap) if attempts >= cap => {
          warn!(id, endpoint = %endpoint, attempts, "Evicting mutation after attempt cap");
          self.store.remove(id)?;
          report.evicted += 1;
        }
        _ => report.retained += 1,
      }
    }

    info!(
      trigger,
      replayed = report.replayed,
      retained = report.retained,
      evicted = report.evicted,
      "Drain complete"
    );

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use color_eyre::eyre::eyre;
  use std::sync::atomic::{AtomicU32, Ordering};
  use std::sync::Mutex as StdMutex;
  use std::time::Duration;

  fn queue(max_attempts: Option<u32>) -> SyncQueue {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    SyncQueue::new(store, max_attempts)
  }

  fn mutation(trigger: &str, body: &str) -> NewMutation {
    NewMutation {
      trigger: trigger.to_string(),
      method: "POST".to_string(),
      endpoint: "/api/consumption".to_string(),
      content_type: "application/json".to_string(),
      payload: body.as_bytes().to_vec(),
    }
  }

  fn ok() -> StoredResponse {
    StoredResponse::new(200, vec![], vec![])
  }

  #[tokio::test]
  async fn test_drain_replays_in_fifo_order() {
    let queue = queue(None);
    for i in 0..3 {
      queue.enqueue(mutation("sync-consumption-logs", &format!("m{}", i))).unwrap();
    }

    let order = StdMutex::new(Vec::new());
    let report = queue
      .drain("sync-consumption-logs", |m| {
        order.lock().unwrap().push(m.payload.clone());
        async { Ok(ok()) }
      })
      .await
      .unwrap();

    assert_eq!(report.replayed, 3);
    assert_eq!(
      *order.lock().unwrap(),
      vec![b"m0".to_vec(), b"m1".to_vec(), b"m2".to_vec()]
    );
    assert_eq!(queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_failures_are_independent() {
    // Mutation 1 of 3 fails; 2 and 3 are still attempted in the same pass,
    // and only the successes are removed
    let queue = queue(None);
    for i in 0..3 {
      queue.enqueue(mutation("sync-consumption-logs", &format!("m{}", i))).unwrap();
    }

    let attempted = AtomicU32::new(0);
    let report = queue
      .drain("sync-consumption-logs", |m| {
        attempted.fetch_add(1, Ordering::SeqCst);
        async move {
          if m.payload == b"m0" {
            Err(eyre!("endpoint down"))
          } else {
            Ok(ok())
          }
        }
      })
      .await
      .unwrap();

    assert_eq!(attempted.load(Ordering::SeqCst), 3);
    assert_eq!(report.replayed, 2);
    assert_eq!(report.retained, 1);
    assert_eq!(queue.pending_count().unwrap(), 1);

    let remaining = queue.store.pending("sync-consumption-logs").unwrap();
    assert_eq!(remaining[0].payload, b"m0");
    assert_eq!(remaining[0].attempts, 1);
  }

  #[tokio::test]
  async fn test_non_2xx_replay_is_retained() {
    let queue = queue(None);
    queue.enqueue(mutation("sync-meal-plans", "m")).unwrap();

    let report = queue
      .drain("sync-meal-plans", |_| async {
        Ok(StoredResponse::new(500, vec![], vec![]))
      })
      .await
      .unwrap();

    assert_eq!(report.retained, 1);
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_drain_only_touches_its_trigger() {
    let queue = queue(None);
    queue.enqueue(mutation("sync-consumption-logs", "a")).unwrap();
    queue.enqueue(mutation("sync-meal-plans", "b")).unwrap();

    let report = queue
      .drain("sync-consumption-logs", |_| async { Ok(ok()) })
      .await
      .unwrap();

    assert_eq!(report.replayed, 1);
    assert_eq!(queue.pending_count().unwrap(), 1);
  }

  #[tokio::test]
  async fn test_reentrant_drain_is_skipped() {
    let queue = Arc::new(queue(None));
    queue.enqueue(mutation("sync-consumption-logs", "slow")).unwrap();

    let slow = queue.drain("sync-consumption-logs", |_| async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Ok(ok())
    });
    let concurrent = async {
      // Let the first drain take the lock before contending
      tokio::time::sleep(Duration::from_millis(10)).await;
      queue.drain("sync-consumption-logs", |_| async { Ok(ok()) }).await
    };

    let (first, second) = tokio::join!(slow, concurrent);
    assert_eq!(first.unwrap().replayed, 1);
    assert!(second.unwrap().skipped);
  }

  #[tokio::test]
  async fn test_drain_is_safely_reinvocable() {
    let queue = queue(None);
    queue.enqueue(mutation("sync-meal-plans", "m")).unwrap();

    let first = queue.drain("sync-meal-plans", |_| async { Ok(ok()) }).await.unwrap();
    let second = queue.drain("sync-meal-plans", |_| async { Ok(ok()) }).await.unwrap();

    assert_eq!(first.replayed, 1);
    assert_eq!(second, DrainReport::default());
  }

  #[tokio::test]
  async fn test_attempt_cap_evicts() {
    let queue = queue(Some(2));
    queue.enqueue(mutation("sync-consumption-logs", "stuck")).unwrap();

    let first = queue
      .drain("sync-consumption-logs", |_| async { Err(eyre!("down")) })
      .await
      .unwrap();
    assert_eq!(first.retained, 1);

    let second = queue
      .drain("sync-consumption-logs", |_| async { Err(eyre!("down")) })
      .await
      .unwrap();
    assert_eq!(second.evicted, 1);
    assert_eq!(queue.pending_count().unwrap(), 0);
  }

  #[tokio::test]
  async fn test_no_cap_retries_indefinitely() {
    let queue = queue(None);
    queue.enqueue(mutation("sync-consumption-logs", "stuck")).unwrap();

    for _ in 0..5 {
      queue
        .drain("sync-consumption-logs", |_| async { Err(eyre!("down")) })
        .await
        .unwrap();
    }

    assert_eq!(queue.pending_count().unwrap(), 1);
  }
}
