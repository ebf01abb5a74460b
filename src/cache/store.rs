//! Storage traits and the SQLite implementation backing them.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::signature::RequestSignature;
use super::types::{NewMutation, PendingMutation, StoredResponse};

/// Trait for the cache partition store.
///
/// Entries are response snapshots keyed by request signature, grouped into
/// named partitions. Writes overwrite in place; last writer wins.
pub trait PartitionStore: Send + Sync {
  /// Create the partition if it does not exist yet.
  fn ensure_partition(&self, partition: &str) -> Result<()>;

  /// Store (or overwrite) an entry.
  fn put(&self, partition: &str, signature: &RequestSignature, response: &StoredResponse)
    -> Result<()>;

  /// Look up an entry.
  fn get(&self, partition: &str, signature: &RequestSignature) -> Result<Option<StoredResponse>>;

  /// Delete a single entry. Returns whether an entry was removed.
  fn delete(&self, partition: &str, signature: &RequestSignature) -> Result<bool>;

  /// Names of all partitions currently present.
  fn list_partitions(&self) -> Result<Vec<String>>;

  /// Delete a partition and every entry in it.
  fn delete_partition(&self, partition: &str) -> Result<()>;
}

/// Trait for the deferred sync queue's durable backing list.
pub trait MutationStore: Send + Sync {
  /// Append a mutation. Returns its assigned id.
  fn enqueue(&self, mutation: &NewMutation) -> Result<i64>;

  /// Pending mutations for a trigger, in FIFO (enqueue) order.
  fn pending(&self, trigger: &str) -> Result<Vec<PendingMutation>>;

  /// Remove a replayed mutation.
  fn remove(&self, id: i64) -> Result<()>;

  /// Record a failed replay attempt. Returns the updated attempt count.
  fn record_attempt(&self, id: i64) -> Result<u32>;

  /// Total pending mutations across all triggers.
  fn pending_count(&self) -> Result<u64>;
}

/// SQLite-backed store holding partitions, entries and the mutation queue
/// in one database file.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create data directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// Open an in-memory store. Used by tests.
  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .lock()?
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(())
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache partitions, entries and the pending-mutation queue.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS partitions (
    name TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);

-- Response snapshots; one row per (partition, request signature)
CREATE TABLE IF NOT EXISTS entries (
    partition TEXT NOT NULL,
    signature TEXT NOT NULL,
    status INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    PRIMARY KEY (partition, signature)
);

-- Deferred sync queue; rowid order is FIFO order
CREATE TABLE IF NOT EXISTS pending_mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_trigger TEXT NOT NULL,
    method TEXT NOT NULL,
    endpoint TEXT NOT NULL,
    content_type TEXT NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_trigger ON pending_mutations(sync_trigger, id);
"#;

impl PartitionStore for SqliteStore {
  fn ensure_partition(&self, partition: &str) -> Result<()> {
    self
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO partitions (name, created_at) VALUES (?, ?)",
        params![partition, Utc::now().to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to create partition {}: {}", partition, e))?;

    Ok(())
  }

  fn put(
    &self,
    partition: &str,
    signature: &RequestSignature,
    response: &StoredResponse,
  ) -> Result<()> {
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO entries (partition, signature, status, headers, body, stored_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          partition,
          signature.as_str(),
          response.status,
          headers,
          response.body,
          response.stored_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store entry: {}", e))?;

    Ok(())
  }

  fn get(&self, partition: &str, signature: &RequestSignature) -> Result<Option<StoredResponse>> {
    let conn = self.lock()?;

    let row: Option<(u16, String, Vec<u8>, String)> = conn
      .query_row(
        "SELECT status, headers, body, stored_at FROM entries
         WHERE partition = ? AND signature = ?",
        params![partition, signature.as_str()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    match row {
      Some((status, headers, body, stored_at)) => {
        let headers: Vec<(String, String)> = serde_json::from_str(&headers)
          .map_err(|e| eyre!("Failed to parse stored headers: {}", e))?;

        Ok(Some(StoredResponse {
          status,
          headers,
          body,
          stored_at: parse_datetime(&stored_at)?,
        }))
      }
      None => Ok(None),
    }
  }

  fn delete(&self, partition: &str, signature: &RequestSignature) -> Result<bool> {
    let removed = self
      .lock()?
      .execute(
        "DELETE FROM entries WHERE partition = ? AND signature = ?",
        params![partition, signature.as_str()],
      )
      .map_err(|e| eyre!("Failed to delete entry: {}", e))?;

    Ok(removed > 0)
  }

  fn list_partitions(&self) -> Result<Vec<String>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare("SELECT name FROM partitions ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare partition query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_partition(&self, partition: &str) -> Result<()> {
    let conn = self.lock()?;

    conn
      .execute("DELETE FROM entries WHERE partition = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition entries: {}", e))?;
    conn
      .execute("DELETE FROM partitions WHERE name = ?", params![partition])
      .map_err(|e| eyre!("Failed to delete partition {}: {}", partition, e))?;

    Ok(())
  }
}

impl MutationStore for SqliteStore {
  fn enqueue(&self, mutation: &NewMutation) -> Result<i64> {
    let conn = self.lock()?;

    conn
      .execute(
        "INSERT INTO pending_mutations (sync_trigger, method, endpoint, content_type, payload, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
          mutation.trigger,
          mutation.method,
          mutation.endpoint,
          mutation.content_type,
          mutation.payload,
          Utc::now().to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue mutation: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn pending(&self, trigger: &str) -> Result<Vec<PendingMutation>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, sync_trigger, method, endpoint, content_type, payload, created_at, attempts
         FROM pending_mutations WHERE sync_trigger = ? ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare pending query: {}", e))?;

    let rows: Vec<(i64, String, String, String, String, Vec<u8>, String, u32)> = stmt
      .query_map(params![trigger], |row| {
        Ok((
          row.get(0)?,
          row.get(1)?,
          row.get(2)?,
          row.get(3)?,
          row.get(4)?,
          row.get(5)?,
          row.get(6)?,
          row.get(7)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query pending mutations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    let mut mutations = Vec::with_capacity(rows.len());
    for (id, trigger, method, endpoint, content_type, payload, created_at, attempts) in rows {
      mutations.push(PendingMutation {
        id,
        trigger,
        method,
        endpoint,
        content_type,
        payload,
        created_at: parse_datetime(&created_at)?,
        attempts,
      });
    }

    Ok(mutations)
  }

  fn remove(&self, id: i64) -> Result<()> {
    self
      .lock()?
      .execute("DELETE FROM pending_mutations WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;

    Ok(())
  }

  fn record_attempt(&self, id: i64) -> Result<u32> {
    let conn = self.lock()?;

    conn
      .execute(
        "UPDATE pending_mutations SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| eyre!("Failed to record attempt for mutation {}: {}", id, e))?;

    let attempts: u32 = conn
      .query_row(
        "SELECT attempts FROM pending_mutations WHERE id = ?",
        params![id],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to read attempts for mutation {}: {}", id, e))?;

    Ok(attempts)
  }

  fn pending_count(&self) -> Result<u64> {
    let count: i64 = self
      .lock()?
      .query_row("SELECT COUNT(*) FROM pending_mutations", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count pending mutations: {}", e))?;

    Ok(count as u64)
  }
}

/// Parse an RFC 3339 timestamp as written by this store.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
