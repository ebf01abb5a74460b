//! Record types persisted by the store and the resolution metadata
//! strategies attach to responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A response snapshot as written to a cache partition.
///
/// Explicit record rather than an opaque blob: status, headers and body are
/// individually addressable so schema changes can be migrated deliberately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub stored_at: DateTime<Utc>,
}

impl StoredResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      stored_at: Utc::now(),
    }
  }

  /// 2xx status check, the bar for writing an entry back to a partition.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Look up a header value, case-insensitive on the name.
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header("content-type")
  }
}

/// A mutation waiting in the deferred sync queue, as read back from storage.
///
/// Owned exclusively by the queue until replayed, then deleted. Replay is
/// all-or-nothing per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMutation {
  pub id: i64,
  /// Sync trigger this mutation drains under (e.g. "sync-consumption-logs")
  pub trigger: String,
  pub method: String,
  pub endpoint: String,
  pub content_type: String,
  pub payload: Vec<u8>,
  pub created_at: DateTime<Utc>,
  pub attempts: u32,
}

/// A mutation about to be enqueued; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewMutation {
  pub trigger: String,
  pub method: String,
  pub endpoint: String,
  pub content_type: String,
  pub payload: Vec<u8>,
}

/// A resolved request, including where the response came from.
#[derive(Debug, Clone)]
pub struct Resolution {
  pub response: StoredResponse,
  pub source: ResolvedFrom,
}

impl Resolution {
  pub fn from_network(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResolvedFrom::Network,
    }
  }

  pub fn from_cache(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResolvedFrom::Cache,
    }
  }

  pub fn offline_fallback(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResolvedFrom::OfflineFallback,
    }
  }

  pub fn queued(response: StoredResponse) -> Self {
    Self {
      response,
      source: ResolvedFrom::Queued,
    }
  }
}

/// Where a resolved response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFrom {
  /// Fresh data from the network
  Network,
  /// Served from a cache partition
  Cache,
  /// Synthesized offline response; neither network nor cache could answer
  OfflineFallback,
  /// Mutation accepted into the deferred sync queue for later replay
  Queued,
}
