//! `MemoryService`: the single composition root wiring C1-C10 together
//! (spec.md §9 "Singletons & global state" — explicit construction via
//! dependency injection, no process-wide defaults).

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::MemoryConfig;
use crate::consolidation::{ConsolidationReport, ConsolidationStore, ConsolidationWorker, WorkingSetEntry};
use crate::continuity::{ContextSnapshot, ContinuityManager};
use crate::embeddings::Embedder;
#[cfg(feature = "embeddings")]
use crate::embeddings::FastEmbedder;
use crate::embeddings::HashingEmbedder;
use crate::error::Result;
use crate::graph::EdgeRepo;
use crate::interceptors::{IngestContext, InterceptorRegistry, PrivacyFilterHook, ProjectScopeHook};
use crate::memory::{ContinuityLog, Edge, Event};
use crate::metadata::MetaValue;
use crate::outbox::{OutboxSource, OutboxWorker, WorkerRunSummary};
use crate::replication::{self, PullReport};
use crate::retriever::{RetrieveOptions, RetrieveResult, Retriever};
use crate::shared::{PromotionCandidate, PromotionOutcome, SharedStore};
use crate::store::{AppendOutcome, EventStore};
use crate::vector::VectorStore;

/// Builds the default `Embedder` for the running feature set: `fastembed`
/// when the `embeddings` feature is enabled, the dependency-free hashing
/// embedder otherwise.
fn default_embedder() -> Arc<dyn Embedder> {
    #[cfg(feature = "embeddings")]
    {
        Arc::new(FastEmbedder::new())
    }
    #[cfg(not(feature = "embeddings"))]
    {
        Arc::new(HashingEmbedder::new())
    }
}

pub struct MemoryService {
    config: MemoryConfig,
    events: Arc<EventStore>,
    vectors: Arc<VectorStore>,
    edges: Arc<EdgeRepo>,
    shared: Arc<SharedStore>,
    consolidation_store: Arc<ConsolidationStore>,
    consolidation: ConsolidationWorker,
    continuity: ContinuityManager,
    retriever: Retriever,
    interceptors: InterceptorRegistry,
    outbox_worker: OutboxWorker<EventStore>,
}

impl MemoryService {
    /// Wires every component against `config.db_path` (a single SQLite file
    /// shared by all tables, per spec.md §5 concurrency model) and registers
    /// the two stock ingest hooks.
    pub fn new(config: MemoryConfig, project_id: impl Into<String>, project_env: impl Into<String>) -> Result<Self> {
        Self::with_embedder(config, project_id, project_env, default_embedder())
    }

    pub fn with_embedder(
        config: MemoryConfig,
        project_id: impl Into<String>,
        project_env: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let events = Arc::new(EventStore::open(&config)?);
        let vectors = Arc::new(VectorStore::open(&config.db_path, embedder.dimensions())?);
        let edges = Arc::new(EdgeRepo::open(&config.db_path)?);
        let shared = Arc::new(SharedStore::open(&config.db_path, vectors.clone(), embedder.clone())?);
        let consolidation_store = Arc::new(ConsolidationStore::open(&config.db_path)?);
        let continuity = ContinuityManager::open(&config.db_path, config.clone())?;

        let retriever = Retriever::new(events.clone(), vectors.clone(), edges.clone(), embedder.clone(), config.clone());
        let consolidation = ConsolidationWorker::new(events.clone(), consolidation_store.clone(), config.clone());
        let outbox_worker = OutboxWorker::new(
            events.clone(),
            vectors.clone(),
            embedder,
            config.outbox_batch_size,
            config.outbox_poll_interval_ms,
            config.outbox_stale_after_secs,
            config.outbox_max_retries,
        );

        let mut interceptors = InterceptorRegistry::new();
        interceptors.register_before(Box::new(ProjectScopeHook::new(project_id, project_env)));
        interceptors.register_before(Box::new(PrivacyFilterHook::new(&config)));

        Ok(Self { config, events, vectors, edges, shared, consolidation_store, consolidation, continuity, retriever, interceptors, outbox_worker })
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventStore> {
        &self.events
    }

    pub fn vectors(&self) -> &Arc<VectorStore> {
        &self.vectors
    }

    pub fn edges(&self) -> &Arc<EdgeRepo> {
        &self.edges
    }

    /// The C3 worker, for a long-lived driver to run its own poll loop
    /// against (`cml worker run`). Single drain passes go through
    /// [`Self::drain_outbox_once`] instead.
    pub fn outbox_worker(&self) -> &OutboxWorker<EventStore> {
        &self.outbox_worker
    }

    /// C9 before-hooks -> C1 append -> C9 after-hooks -> C5 working-set
    /// ingestion (spec.md §4.1 + §4.9).
    pub fn append(
        &self,
        event_type: &str,
        session_id: &str,
        turn_id: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
        content: &str,
        mut metadata: MetaValue,
    ) -> Result<AppendOutcome> {
        {
            let mut ctx = IngestContext { event_type, session_id, content, metadata: &mut metadata };
            self.interceptors.run_before(&mut ctx);
        }

        let outcome = self.events.append(event_type, session_id, turn_id, timestamp, content, metadata)?;

        if !outcome.is_duplicate {
            if let Some(event) = self.events.get(&outcome.id)? {
                self.interceptors.run_after(&event);
                self.ingest_working_set(&event);
            }
        }

        Ok(outcome)
    }

    fn ingest_working_set(&self, event: &Event) {
        let snapshot = ContextSnapshot::extract(event.id.clone(), &event.content, &[]);
        self.consolidation.ingest(WorkingSetEntry {
            event_id: event.id.clone(),
            session_id: event.session_id.clone(),
            topics: snapshot.topics,
            relevance: 1.0,
            timestamp: event.timestamp,
        });
    }

    /// C7 retrieval.
    pub fn retrieve(&self, query: &str, options: RetrieveOptions) -> Result<RetrieveResult> {
        self.retriever.retrieve(query, options)
    }

    /// C3 single drain pass.
    pub fn drain_outbox_once(&self) -> WorkerRunSummary {
        self.outbox_worker.run_once()
    }

    /// C5 single consolidation pass.
    pub fn run_consolidation(&self) -> Result<ConsolidationReport> {
        self.consolidation.run_once()
    }

    pub fn working_set_len(&self) -> usize {
        self.consolidation.working_set_len()
    }

    /// C4 edge creation, idempotent on `(src_id, rel_type, dst_id)`.
    pub fn link(&self, src_type: &str, src_id: &str, rel_type: crate::memory::RelType, dst_type: &str, dst_id: &str, meta: MetaValue) -> Result<Edge> {
        self.edges.create(src_type, src_id, rel_type, dst_type, dst_id, meta)
    }

    /// C6 promotion of a troubleshooting entry to the shared store.
    pub fn promote_shared(&self, source_project_hash: &str, candidate: &PromotionCandidate) -> Result<(PromotionOutcome, crate::memory::SharedTroubleshootingEntry)> {
        self.shared.promote_entry(source_project_hash, candidate, &self.config)
    }

    /// C8: score `text` against the process's last observed context and log
    /// the transition.
    pub fn observe_context(&self, id: impl Into<String>, text: &str, known_files: &[String]) -> Result<ContinuityLog> {
        let snapshot = ContextSnapshot::extract(id, text, known_files);
        self.continuity.observe(snapshot)
    }

    /// C10: one pull round from a peer database.
    pub fn replicate_pull(&self, peer_db_path: &Path, cursor: i64, limit: usize) -> Result<PullReport> {
        replication::pull_from_path(peer_db_path, &self.events, cursor, limit)
    }

    /// spec.md §6 `ops report-sync-gap`: events lacking a `memory_levels`
    /// row, plus outbox items stuck `pending`/`failed`.
    pub fn report_sync_gap(&self) -> Result<SyncGapReport> {
        let missing_levels = self.events.un_leveled_count()?;
        let (pending, failed) = self.events.outbox_counts()?;
        Ok(SyncGapReport { missing_levels, outbox_pending: pending, outbox_failed: failed })
    }

    /// spec.md §6 `ops fix-sync-gap`: inserts missing `memory_levels` rows
    /// and resets stale `processing` outbox rows back to `pending`.
    pub fn fix_sync_gap(&self) -> Result<SyncGapFix> {
        let inserted_levels = self.events.insert_missing_levels()?;
        let recovered = self.events.recover_stale(self.config.outbox_stale_after_secs)?;
        Ok(SyncGapFix { inserted_levels, recovered_outbox_rows: recovered })
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncGapReport {
    pub missing_levels: u64,
    pub outbox_pending: u64,
    pub outbox_failed: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncGapFix {
    pub inserted_levels: usize,
    pub recovered_outbox_rows: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> (MemoryService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MemoryConfig::default();
        config.db_path = dir.path().join("events.sqlite");
        let svc = MemoryService::with_embedder(config, "proj", "dev", Arc::new(HashingEmbedder::new())).unwrap();
        (svc, dir)
    }

    #[test]
    fn append_runs_hooks_and_feeds_working_set() {
        let (svc, _dir) = service();
        let outcome = svc.append("user_prompt", "s1", None, None, "deploy nginx now", MetaValue::empty_map()).unwrap();
        assert!(outcome.success);

        let event = svc.events().get(&outcome.id).unwrap().unwrap();
        assert_eq!(event.metadata.get_path("scope.project.id").and_then(|v| v.as_str().map(str::to_string)), Some("proj".to_string()));
        assert_eq!(svc.working_set_len(), 1);
    }

    #[test]
    fn sync_gap_report_and_fix_round_trip() {
        let (svc, _dir) = service();
        svc.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
        let report = svc.report_sync_gap().unwrap();
        assert_eq!(report.missing_levels, 0);

        let fix = svc.fix_sync_gap().unwrap();
        assert_eq!(fix.inserted_levels, 0);
    }
}
