//! Outbox & Vector Worker (C3): single-writer pipeline draining the
//! embedding outbox into the vector store.

mod worker;

pub use worker::{OutboxWorker, WorkerRunSummary};

use crate::error::Result;
use crate::memory::{Event, OutboxItem};

/// Narrow capability interface the worker needs from the event store,
/// breaking the `EventStore <-> VectorWorker` cycle per spec.md §9.
pub trait OutboxSource: Send + Sync {
    /// Atomically claim up to `batch_size` `pending` rows, flipping them to
    /// `processing`.
    fn claim_batch(&self, batch_size: usize) -> Result<Vec<OutboxItem>>;

    /// Mark an item `done`.
    fn complete(&self, outbox_id: i64) -> Result<()>;

    /// Mark an item `failed` with a reason, incrementing `attempt_count`.
    fn fail(&self, outbox_id: i64, reason: &str) -> Result<()>;

    /// Load the event an outbox item refers to.
    fn get_event(&self, event_id: &str) -> Result<Option<Event>>;

    /// Reset `processing` rows older than `stale_after_secs` back to
    /// `pending` (crash recovery, spec.md §4.3).
    fn recover_stale(&self, stale_after_secs: i64) -> Result<usize>;

    /// Return `failed` rows with `attempt_count < max_retries` to `pending`.
    fn retry_failed(&self, max_retries: u32) -> Result<usize>;
}
