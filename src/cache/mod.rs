//! Durable cache partition store and its record types.
//!
//! This module provides the agent's persistent key/value layer:
//! - Response snapshots keyed by request signature, grouped into named,
//!   independently versioned partitions
//! - The pending-mutation records owned by the deferred sync queue
//! - A storage trait seam with a SQLite implementation

mod signature;
mod store;
mod types;

pub use signature::RequestSignature;
pub use store::{MutationStore, PartitionStore, SqliteStore};
pub use types::{NewMutation, PendingMutation, Resolution, ResolvedFrom, StoredResponse};
