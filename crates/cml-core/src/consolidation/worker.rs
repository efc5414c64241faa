//! Consolidation worker (spec.md §4.5): clusters the working set by topic
//! overlap, emits `ConsolidatedMemory` rows, and promotes recurring clusters
//! to `Rule`s. The progress-tracker (`ConsolidationRun`) is adapted directly
//! from the teacher's `consolidation::sleep::ConsolidationRun` pattern.

use std::sync::Arc;

use chrono::Utc;

use crate::config::MemoryConfig;
use crate::memory::{ConsolidatedMemory, MemoryLevel};
use crate::store::EventStore;

use super::store::ConsolidationStore;
use super::working_set::{WorkingSet, WorkingSetEntry};

/// spec.md §4.5 "Report".
#[derive(Debug, Clone, Default)]
pub struct ConsolidationReport {
    pub consolidated_count: usize,
    pub promoted_rule_count: usize,
    pub before_token_estimate: usize,
    pub after_token_estimate: usize,
    pub reduction_ratio: f64,
    pub quality_guard_passed: bool,
}

/// Accumulates a single consolidation run, generalized from the teacher's
/// `ConsolidationRun`/`SleepConsolidation` record-then-finish pattern.
struct ConsolidationRun {
    consolidated_count: usize,
    promoted_rule_count: usize,
    before_tokens: usize,
    after_tokens: usize,
    min_coverage_seen: f64,
}

impl ConsolidationRun {
    fn new() -> Self {
        Self { consolidated_count: 0, promoted_rule_count: 0, before_tokens: 0, after_tokens: 0, min_coverage_seen: 1.0 }
    }

    fn record_cluster(&mut self, before_tokens: usize, after_tokens: usize, coverage: f64) {
        self.consolidated_count += 1;
        self.before_tokens += before_tokens;
        self.after_tokens += after_tokens;
        self.min_coverage_seen = self.min_coverage_seen.min(coverage);
    }

    fn record_rule(&mut self) {
        self.promoted_rule_count += 1;
    }

    fn finish(self, min_coverage: f64) -> ConsolidationReport {
        let reduction_ratio = if self.before_tokens == 0 {
            0.0
        } else {
            1.0 - (self.after_tokens as f64 / self.before_tokens as f64)
        };
        ConsolidationReport {
            consolidated_count: self.consolidated_count,
            promoted_rule_count: self.promoted_rule_count,
            before_token_estimate: self.before_tokens,
            after_token_estimate: self.after_tokens,
            reduction_ratio,
            quality_guard_passed: self.min_coverage_seen >= min_coverage,
        }
    }
}

/// Jaccard similarity over two lower-cased token sets.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let sa: HashSet<String> = a.iter().map(|s| s.to_lowercase()).collect();
    let sb: HashSet<String> = b.iter().map(|s| s.to_lowercase()).collect();
    if sa.is_empty() && sb.is_empty() {
        return 0.0;
    }
    let intersection = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Greedy single-link clustering: an entry joins the first cluster whose
/// representative (first member) scores >= `min_similarity`, else starts a
/// new cluster.
fn cluster_by_topic(entries: &[WorkingSetEntry], min_similarity: f64) -> Vec<Vec<WorkingSetEntry>> {
    let mut clusters: Vec<Vec<WorkingSetEntry>> = Vec::new();
    for entry in entries {
        let mut placed = false;
        for cluster in clusters.iter_mut() {
            if jaccard(&cluster[0].topics, &entry.topics) >= min_similarity {
                cluster.push(entry.clone());
                placed = true;
                break;
            }
        }
        if !placed {
            clusters.push(vec![entry.clone()]);
        }
    }
    clusters
}

/// spec.md §4.5 trigger conditions.
pub fn should_trigger(
    events_since_last_run: usize,
    ms_since_last_run: u64,
    idle_ms: u64,
    config: &MemoryConfig,
) -> bool {
    events_since_last_run >= config.trigger_event_count
        || ms_since_last_run >= config.trigger_interval_ms
        || idle_ms >= config.trigger_idle_ms
}

pub struct ConsolidationWorker {
    working_set: std::sync::Mutex<WorkingSet>,
    event_store: Arc<EventStore>,
    store: Arc<ConsolidationStore>,
    config: MemoryConfig,
}

impl ConsolidationWorker {
    pub fn new(event_store: Arc<EventStore>, store: Arc<ConsolidationStore>, config: MemoryConfig) -> Self {
        let working_set = WorkingSet::new(config.working_set_max_events, config.working_set_time_window_hours);
        Self { working_set: std::sync::Mutex::new(working_set), event_store, store, config }
    }

    pub fn ingest(&self, entry: WorkingSetEntry) {
        self.working_set.lock().expect("working set poisoned").push(entry);
    }

    pub fn working_set_len(&self) -> usize {
        self.working_set.lock().expect("working set poisoned").len()
    }

    /// spec.md §4.5 consolidation algorithm, steps 1-4.
    pub fn run_once(&self) -> crate::error::Result<ConsolidationReport> {
        let entries = self.working_set.lock().expect("working set poisoned").snapshot();
        let clusters = cluster_by_topic(&entries, self.config.min_cluster_similarity);

        let mut run = ConsolidationRun::new();
        let mut consolidated_ids: std::collections::HashSet<String> = std::collections::HashSet::new();

        for cluster in clusters.into_iter().filter(|c| c.len() >= 2) {
            let source_event_ids: Vec<String> = cluster.iter().map(|e| e.event_id.clone()).collect();
            let topics = merged_topics(&cluster);
            let coherence = cluster_coherence(&cluster);
            let confidence = size_adjusted_confidence(coherence, cluster.len());

            let summary = deterministic_summary(&topics, cluster.len());
            let before_tokens = cluster.iter().map(|e| estimate_tokens(&e.topics)).sum::<usize>().max(source_event_ids.len() * 20);
            let after_tokens = estimate_tokens(&topics) + summary.len() / 4;
            let coverage = (after_tokens as f64 / before_tokens.max(1) as f64).min(1.0).max(0.0);

            let memory = ConsolidatedMemory {
                memory_id: uuid::Uuid::new_v4().to_string(),
                summary,
                topics: topics.clone(),
                source_event_ids: source_event_ids.clone(),
                confidence,
                created_at: Utc::now(),
            };

            if let Some(persisted) = self.store.insert_memory_if_new(&memory)? {
                run.record_cluster(before_tokens, after_tokens, coverage);
                for id in &source_event_ids {
                    self.event_store.set_level(id, MemoryLevel::L1)?;
                    consolidated_ids.insert(id.clone());
                }

                if persisted.confidence >= self.config.rule_threshold {
                    let recurrences = self.store.count_recurring_topic_sets(&topics)?;
                    if recurrences >= self.config.min_recurrences {
                        let rule_text = format!("Recurring pattern: {}", topics.join(", "));
                        if self
                            .store
                            .promote_rule_if_new(&persisted.memory_id, &rule_text, &persisted.source_event_ids, persisted.confidence)?
                            .is_some()
                        {
                            run.record_rule();
                        }
                    }
                }
            }
        }

        self.working_set.lock().expect("working set poisoned").remove_ids(&consolidated_ids);
        Ok(run.finish(self.config.min_coverage))
    }
}

fn merged_topics(cluster: &[WorkingSetEntry]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    for entry in cluster {
        for topic in &entry.topics {
            seen.insert(topic.to_lowercase());
        }
    }
    seen.into_iter().collect()
}

/// Mean pairwise Jaccard across the cluster, the "size-adjusted mean cluster
/// coherence" named in spec.md §4.5 step 2.
fn cluster_coherence(cluster: &[WorkingSetEntry]) -> f64 {
    if cluster.len() < 2 {
        return 1.0;
    }
    let mut total = 0.0;
    let mut pairs = 0;
    for i in 0..cluster.len() {
        for j in (i + 1)..cluster.len() {
            total += jaccard(&cluster[i].topics, &cluster[j].topics);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

fn size_adjusted_confidence(coherence: f64, size: usize) -> f64 {
    let size_factor = (size as f64 / (size as f64 + 1.0)).min(1.0);
    (coherence * 0.7 + size_factor * 0.3).clamp(0.0, 1.0)
}

fn deterministic_summary(topics: &[String], source_count: usize) -> String {
    format!("Consolidated {} related events covering: {}", source_count, topics.join(", "))
}

fn estimate_tokens(topics: &[String]) -> usize {
    topics.iter().map(|t| t.len() / 4 + 1).sum::<usize>().max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, topics: &[&str]) -> WorkingSetEntry {
        WorkingSetEntry {
            event_id: id.to_string(),
            session_id: "s1".to_string(),
            topics: topics.iter().map(|s| s.to_string()).collect(),
            relevance: 0.5,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn jaccard_identical_sets_is_one() {
        let a = vec!["nginx".to_string(), "deploy".to_string()];
        assert_eq!(jaccard(&a, &a), 1.0);
    }

    #[test]
    fn jaccard_disjoint_sets_is_zero() {
        let a = vec!["nginx".to_string()];
        let b = vec!["postgres".to_string()];
        assert_eq!(jaccard(&a, &b), 0.0);
    }

    #[test]
    fn consolidates_overlapping_cluster_and_promotes_rule() {
        let event_store = Arc::new(EventStore::open_in_memory().unwrap());
        let e1 = event_store.append("user_prompt", "s1", None, None, "deploy nginx fails", crate::metadata::MetaValue::empty_map()).unwrap();
        let e2 = event_store.append("user_prompt", "s1", None, None, "nginx deploy timeout", crate::metadata::MetaValue::empty_map()).unwrap();

        let store = Arc::new(ConsolidationStore::open_in_memory().unwrap());
        let mut config = MemoryConfig::default();
        config.min_cluster_similarity = 0.1;
        config.rule_threshold = 0.0;
        config.min_recurrences = 0;

        let worker = ConsolidationWorker::new(event_store.clone(), store.clone(), config);
        worker.ingest(entry(&e1.id, &["nginx", "deploy"]));
        worker.ingest(entry(&e2.id, &["nginx", "deploy"]));

        let report = worker.run_once().unwrap();
        assert_eq!(report.consolidated_count, 1);
        assert_eq!(worker.working_set_len(), 0);

        let leveled = event_store.get(&e1.id).unwrap().unwrap();
        assert_eq!(leveled.event_type.as_str(), "user_prompt");
        assert_eq!(store.all_memories().unwrap().len(), 1);
    }

    #[test]
    fn running_twice_on_same_source_set_is_idempotent() {
        let event_store = Arc::new(EventStore::open_in_memory().unwrap());
        let e1 = event_store.append("user_prompt", "s1", None, None, "deploy nginx fails", crate::metadata::MetaValue::empty_map()).unwrap();
        let e2 = event_store.append("user_prompt", "s1", None, None, "nginx deploy timeout", crate::metadata::MetaValue::empty_map()).unwrap();

        let store = Arc::new(ConsolidationStore::open_in_memory().unwrap());
        let mut config = MemoryConfig::default();
        config.min_cluster_similarity = 0.1;

        let worker = ConsolidationWorker::new(event_store.clone(), store.clone(), config);
        worker.ingest(entry(&e1.id, &["nginx", "deploy"]));
        worker.ingest(entry(&e2.id, &["nginx", "deploy"]));
        worker.run_once().unwrap();

        worker.ingest(entry(&e1.id, &["nginx", "deploy"]));
        worker.ingest(entry(&e2.id, &["nginx", "deploy"]));
        let report2 = worker.run_once().unwrap();
        assert_eq!(report2.consolidated_count, 0);
        assert_eq!(store.all_memories().unwrap().len(), 1);
    }
}
