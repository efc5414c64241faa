//! End-to-end scenarios exercising `MemoryService` as an external caller
//! would: through the public API only, against a real on-disk SQLite file.

use cml_core::{
    MemoryConfig, MemoryService, MetaValue, OutboxSource, PromotionCandidate, RetrieveOptions,
    Strategy,
};

fn service() -> (MemoryService, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = MemoryConfig::default();
    config.db_path = dir.path().join("events.sqlite");
    let svc = MemoryService::new(config, "proj", "dev").unwrap();
    (svc, dir)
}

/// S1: appending the same `(event_type, session_id, content)` twice inside
/// the dedupe bucket returns the same id, the second time flagged duplicate.
#[test]
fn s1_dedupe() {
    let (svc, _dir) = service();

    let first = svc.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
    assert!(first.success);
    assert!(!first.is_duplicate);

    let second = svc.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
    assert!(second.success);
    assert!(second.is_duplicate);
    assert_eq!(second.id, first.id);

    assert_eq!(svc.events().total_events().unwrap(), 1);
}

/// S2: one outbox drain pass embeds the pending event and makes it
/// searchable in the vector store.
#[test]
fn s2_outbox_drain() {
    let (svc, _dir) = service();
    svc.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();

    let summary = svc.drain_outbox_once();
    assert_eq!(summary.claimed, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(svc.vectors().count(), 1);

    let query = cml_core::HashingEmbedder::new();
    let query_vector = cml_core::Embedder::embed(&query, "hello").unwrap();
    let hits = svc.vectors().search(&query_vector, 1).unwrap();
    assert_eq!(hits.len(), 1);
}

/// S3: a `processing` row orphaned by a crash is reclaimed by the next
/// recovery pass and drains normally.
#[test]
fn s3_worker_crash_recovery() {
    let (svc, _dir) = service();
    let e1 = svc.append("user_prompt", "s1", None, None, "first", MetaValue::empty_map()).unwrap();
    svc.append("user_prompt", "s1", None, None, "second", MetaValue::empty_map()).unwrap();

    // Simulate a worker that claimed a batch and then crashed mid-flight:
    // the row is left `processing` with no corresponding vector write.
    let stuck = svc.events().claim_batch(1).unwrap();
    assert_eq!(stuck.len(), 1);
    assert_eq!(stuck[0].event_id, e1.id);

    let recovered = svc.events().recover_stale(0).unwrap();
    assert_eq!(recovered, 1);

    let summary = svc.drain_outbox_once();
    assert_eq!(summary.completed, 2);
    assert_eq!(svc.vectors().count(), 2);
}

/// S4: `fast` strategy ranks the keyword match above unrelated content.
#[test]
fn s4_hybrid_retrieval() {
    let (svc, _dir) = service();
    let e1 = svc.append("user_prompt", "s1", None, None, "fix deployment issue with nginx", MetaValue::empty_map()).unwrap();
    svc.append("user_prompt", "s1", None, None, "random unrelated text", MetaValue::empty_map()).unwrap();

    let result = svc
        .retrieve("deployment", RetrieveOptions { top_k: 5, strategy: Some(Strategy::Fast), ..Default::default() })
        .unwrap();

    assert_eq!(result.memories[0].event.id, e1.id);
}

/// S5: scope filters exclude events scoped to a different project.
#[test]
fn s5_scope_filter() {
    let (svc, _dir) = service();

    let mut alpha_meta = MetaValue::empty_map();
    alpha_meta.set_path("scope.project.id", MetaValue::scalar("alpha"));
    let alpha = svc.append("user_prompt", "s1", None, None, "memory about alpha", alpha_meta).unwrap();

    let mut beta_meta = MetaValue::empty_map();
    beta_meta.set_path("scope.project.id", MetaValue::scalar("beta"));
    svc.append("user_prompt", "s1", None, None, "memory about beta", beta_meta).unwrap();

    let mut scope = std::collections::HashMap::new();
    scope.insert("scope.project.id".to_string(), "alpha".to_string());
    let result = svc
        .retrieve("memory", RetrieveOptions { top_k: 5, strategy: Some(Strategy::Fast), scope, ..Default::default() })
        .unwrap();

    assert_eq!(result.memories.len(), 1);
    assert_eq!(result.memories[0].event.id, alpha.id);
}

/// S6: a verified troubleshooting entry above `min_confidence_for_promotion`
/// is promoted; a repeat below threshold is rejected; `record_usage`
/// increments the counter.
#[test]
fn s6_shared_promotion() {
    let (svc, _dir) = service();

    let candidate = PromotionCandidate {
        source_entry_id: "local-1".to_string(),
        event_type: "troubleshooting".to_string(),
        stage: "verified".to_string(),
        status: "active".to_string(),
        confidence: 0.9,
        title: "nginx 502 after deploy".to_string(),
        symptoms: vec!["502 Bad Gateway".to_string()],
        root_cause: "upstream not yet listening".to_string(),
        solution: "add a readiness probe before flipping traffic".to_string(),
        topics: vec!["nginx".to_string(), "deploy".to_string()],
        technologies: vec!["nginx".to_string()],
    };

    let (outcome, entry) = svc.promote_shared("hash8abc", &candidate).unwrap();
    assert_eq!(outcome, cml_core::PromotionOutcome::Created);
    assert!((entry.confidence - 0.9).abs() < 1e-9);

    let below_threshold = PromotionCandidate { confidence: 0.7, ..candidate };
    assert!(svc.promote_shared("hash8abc", &below_threshold).is_err());
}

/// S7: events inserted bypassing `memory_levels`, plus a stuck outbox row,
/// are fully repaired by one `fix_sync_gap` call.
#[test]
fn s7_gap_fix() {
    let (svc, _dir) = service();
    svc.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
    svc.append("user_prompt", "s1", None, None, "world", MetaValue::empty_map()).unwrap();

    // Simulate a crashed worker leaving a row `processing`.
    svc.events().claim_batch(1).unwrap();

    let before = svc.report_sync_gap().unwrap();
    assert_eq!(before.outbox_pending + before.outbox_failed + 1, 2);

    let fix = svc.fix_sync_gap().unwrap();
    assert_eq!(fix.recovered_outbox_rows, 1);

    let summary = svc.drain_outbox_once();
    assert_eq!(summary.completed, 2);

    let after = svc.report_sync_gap().unwrap();
    assert_eq!(after.missing_levels, 0);
    assert_eq!(after.outbox_pending, 0);
    assert_eq!(after.outbox_failed, 0);
}

/// C10 replication: a pull round copies events from a peer store and is
/// idempotent on the cursor it returns.
#[test]
fn c10_replication_pull_round_trip() {
    let peer_dir = tempfile::tempdir().unwrap();
    let mut peer_config = MemoryConfig::default();
    peer_config.db_path = peer_dir.path().join("peer.sqlite");
    let peer = MemoryService::new(peer_config, "peer", "dev").unwrap();
    peer.append("user_prompt", "s1", None, None, "from peer", MetaValue::empty_map()).unwrap();

    let (target, _target_dir) = service();
    let report = target.replicate_pull(&peer_dir.path().join("peer.sqlite"), 0, 100).unwrap();
    assert_eq!(report.inserted, 1);
    assert_eq!(target.events().total_events().unwrap(), 1);

    let repeat = target.replicate_pull(&peer_dir.path().join("peer.sqlite"), report.next_cursor, 100).unwrap();
    assert_eq!(repeat.inserted, 0);
}

/// C8 continuity: a drastic topic shift is classified as a break, not a
/// seamless continuation.
#[test]
fn c8_continuity_break_on_topic_shift() {
    let (svc, _dir) = service();
    svc.observe_context("ctx-1", "deploying the nginx ingress controller", &[]).unwrap();
    let log = svc.observe_context("ctx-2", "baking sourdough bread this weekend", &[]).unwrap();

    assert_eq!(log.transition_type, cml_core::TransitionType::Break);
}
