//! Worker loop (spec.md §4.3): drain the embedding outbox and apply records
//! to the vector store. The only writer to C2. Cooperative `tokio::time`
//! loop with an `Arc<AtomicBool>` running flag, mirroring the teacher's
//! cancellable-background-task idiom.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;

use crate::embeddings::Embedder;
use crate::memory::VectorRecord;
use crate::metadata::MetaValue;
use crate::vector::VectorStore;

use super::OutboxSource;

/// Summary of one drain pass, surfaced for tests and the operational
/// scripts (`report-sync-gap`).
#[derive(Debug, Clone, Default)]
pub struct WorkerRunSummary {
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    pub recovered_stale: usize,
}

pub struct OutboxWorker<S: OutboxSource> {
    source: Arc<S>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    poll_interval_ms: u64,
    stale_after_secs: i64,
    max_retries: u32,
    running: Arc<AtomicBool>,
}

impl<S: OutboxSource + 'static> OutboxWorker<S> {
    pub fn new(
        source: Arc<S>,
        vector_store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
        batch_size: usize,
        poll_interval_ms: u64,
        stale_after_secs: i64,
        max_retries: u32,
    ) -> Self {
        Self {
            source,
            vector_store,
            embedder,
            batch_size,
            poll_interval_ms,
            stale_after_secs,
            max_retries,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// One claim/embed/apply pass (spec.md §4.3 steps 1-4). Never returns an
    /// error: embedder/vector-store failures are captured on the outbox rows
    /// themselves, per the crate's error taxonomy (§7 propagation policy).
    pub fn run_once(&self) -> WorkerRunSummary {
        let mut summary = WorkerRunSummary::default();

        match self.source.recover_stale(self.stale_after_secs) {
            Ok(n) => summary.recovered_stale = n,
            Err(e) => tracing::warn!(error = %e, "stale outbox recovery failed"),
        }

        let claimed = match self.source.claim_batch(self.batch_size) {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(error = %e, "failed to claim outbox batch");
                return summary;
            }
        };
        summary.claimed = claimed.len();
        if claimed.is_empty() {
            return summary;
        }

        let mut live_items = Vec::with_capacity(claimed.len());
        let mut live_events = Vec::with_capacity(claimed.len());
        for item in claimed {
            match self.source.get_event(&item.event_id) {
                Ok(Some(event)) => {
                    live_events.push(event);
                    live_items.push(item);
                }
                Ok(None) => {
                    if let Err(e) = self.source.fail(item.id, "event_not_found") {
                        tracing::warn!(error = %e, outbox_id = item.id, "failed to mark missing-event item failed");
                    }
                    summary.failed += 1;
                }
                Err(e) => {
                    tracing::warn!(error = %e, outbox_id = item.id, "failed to load event for outbox item");
                    if let Err(e2) = self.source.fail(item.id, &e.to_string()) {
                        tracing::warn!(error = %e2, outbox_id = item.id, "failed to mark item failed");
                    }
                    summary.failed += 1;
                }
            }
        }

        if live_items.is_empty() {
            return summary;
        }

        let contents: Vec<&str> = live_events.iter().map(|e| e.content.as_str()).collect();
        let vectors = match self.embedder.embed_batch(&contents) {
            Ok(v) => v,
            Err(e) => {
                for item in &live_items {
                    if let Err(e2) = self.source.fail(item.id, &e.to_string()) {
                        tracing::warn!(error = %e2, outbox_id = item.id, "failed to mark embedder-failure item failed");
                    }
                }
                summary.failed += live_items.len();
                return summary;
            }
        };

        let records: Vec<VectorRecord> = live_events
            .iter()
            .zip(vectors)
            .map(|(event, vector)| VectorRecord {
                id: event.id.clone(),
                event_id: event.id.clone(),
                session_id: event.session_id.clone(),
                event_type: event.event_type.as_str().to_string(),
                content: event.content.clone(),
                vector,
                timestamp: Utc::now(),
                metadata: event.metadata.clone(),
            })
            .collect();

        match self.vector_store.upsert_batch(&records) {
            Ok(()) => {
                for item in &live_items {
                    if let Err(e) = self.source.complete(item.id) {
                        tracing::warn!(error = %e, outbox_id = item.id, "failed to mark item done");
                    }
                }
                summary.completed = live_items.len();
            }
            Err(e) => {
                for item in &live_items {
                    if let Err(e2) = self.source.fail(item.id, &e.to_string()) {
                        tracing::warn!(error = %e2, outbox_id = item.id, "failed to mark vector-store-failure item failed");
                    }
                }
                summary.failed += live_items.len();
            }
        }

        summary
    }

    /// Scan `failed` rows and return eligible ones to `pending` (operator
    /// action or periodic retry scan, spec.md §4.3).
    pub fn retry_failed(&self) -> usize {
        self.source.retry_failed(self.max_retries).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "retry scan failed");
            0
        })
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    /// Run the cooperative timer loop until `stop()` is observed.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(self.poll_interval_ms));
        while self.running.load(Ordering::SeqCst) {
            ticker.tick().await;
            let summary = self.run_once();
            if summary.claimed > 0 {
                tracing::debug!(?summary, "outbox worker drain pass");
            }
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use chrono::Utc;

    use crate::embeddings::HashingEmbedder;
    use crate::memory::{Event, EventType, OutboxItem, OutboxStatus};
    use crate::metadata::MetaValue;

    use super::*;

    struct FakeSource {
        events: StdMutex<std::collections::HashMap<String, Event>>,
        items: StdMutex<Vec<OutboxItem>>,
    }

    impl OutboxSource for FakeSource {
        fn claim_batch(&self, batch_size: usize) -> crate::error::Result<Vec<OutboxItem>> {
            let mut items = self.items.lock().unwrap();
            let mut claimed = Vec::new();
            for item in items.iter_mut() {
                if claimed.len() >= batch_size {
                    break;
                }
                if item.status == OutboxStatus::Pending {
                    item.status = OutboxStatus::Processing;
                    claimed.push(item.clone());
                }
            }
            Ok(claimed)
        }

        fn complete(&self, outbox_id: i64) -> crate::error::Result<()> {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.iter_mut().find(|i| i.id == outbox_id) {
                item.status = OutboxStatus::Done;
            }
            Ok(())
        }

        fn fail(&self, outbox_id: i64, reason: &str) -> crate::error::Result<()> {
            let mut items = self.items.lock().unwrap();
            if let Some(item) = items.iter_mut().find(|i| i.id == outbox_id) {
                item.status = OutboxStatus::Failed;
                item.attempt_count += 1;
                item.last_error = Some(reason.to_string());
            }
            Ok(())
        }

        fn get_event(&self, event_id: &str) -> crate::error::Result<Option<Event>> {
            Ok(self.events.lock().unwrap().get(event_id).cloned())
        }

        fn recover_stale(&self, _stale_after_secs: i64) -> crate::error::Result<usize> {
            Ok(0)
        }

        fn retry_failed(&self, _max_retries: u32) -> crate::error::Result<usize> {
            Ok(0)
        }
    }

    fn fake_event(id: &str) -> Event {
        Event {
            id: id.to_string(),
            event_type: EventType::UserPrompt,
            session_id: "s1".to_string(),
            turn_id: None,
            timestamp: Utc::now(),
            content: "hello world".to_string(),
            canonical_key: "c".to_string(),
            dedupe_key: "d".to_string(),
            metadata: MetaValue::empty_map(),
            rowid: Some(1),
        }
    }

    #[test]
    fn drains_one_pending_item_to_done() {
        let dir = tempfile::tempdir().unwrap();
        let vector_store = Arc::new(VectorStore::open(&dir.path().join("v.sqlite"), 256).unwrap());
        let mut events = std::collections::HashMap::new();
        events.insert("e1".to_string(), fake_event("e1"));
        let source = Arc::new(FakeSource {
            events: StdMutex::new(events),
            items: StdMutex::new(vec![OutboxItem {
                id: 1,
                event_id: "e1".to_string(),
                content: "hello world".to_string(),
                status: OutboxStatus::Pending,
                attempt_count: 0,
                last_error: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }]),
        });

        let worker = OutboxWorker::new(source.clone(), vector_store.clone(), Arc::new(HashingEmbedder::new()), 16, 1000, 300, 5);
        let summary = worker.run_once();

        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(vector_store.count(), 1);
        assert_eq!(source.items.lock().unwrap()[0].status, OutboxStatus::Done);
    }

    #[test]
    fn missing_event_marks_item_failed() {
        let dir = tempfile::tempdir().unwrap();
        let vector_store = Arc::new(VectorStore::open(&dir.path().join("v.sqlite"), 256).unwrap());
        let source = Arc::new(FakeSource {
            events: StdMutex::new(std::collections::HashMap::new()),
            items: StdMutex::new(vec![OutboxItem {
                id: 1,
                event_id: "missing".to_string(),
                content: "x".to_string(),
                status: OutboxStatus::Pending,
                attempt_count: 0,
                last_error: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }]),
        });

        let worker = OutboxWorker::new(source.clone(), vector_store, Arc::new(HashingEmbedder::new()), 16, 1000, 300, 5);
        let summary = worker.run_once();

        assert_eq!(summary.failed, 1);
        assert_eq!(source.items.lock().unwrap()[0].status, OutboxStatus::Failed);
    }
}
