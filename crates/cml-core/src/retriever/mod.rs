//! Retriever (C7): hybrid search fusing vector, keyword, and metadata scope
//! (spec.md §4.7). The `hybrid` merge step borrows the teacher's
//! normalize-then-rank helper *shape* from `search::hybrid` but implements
//! this spec's literal max-of-normalized-scores fusion rather than RRF.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::graph::EdgeRepo;
use crate::memory::{Confidence, Event};
use crate::metadata::MetaValue;
use crate::store::EventStore;
use crate::vector::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Fast,
    Hybrid,
    Deep,
}

#[derive(Debug, Clone, Default)]
pub struct RetrieveOptions {
    pub top_k: usize,
    pub min_score: Option<f64>,
    pub scope: HashMap<String, String>,
    pub strategy: Option<Strategy>,
}

#[derive(Debug, Clone)]
pub struct ScoredEvent {
    // event + score pair returned to callers; Clone needed for `best_match`

    pub event: Event,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct RetrieveResult {
    pub memories: Vec<ScoredEvent>,
    pub best_match: Option<ScoredEvent>,
    pub confidence: Confidence,
}

pub struct Retriever {
    event_store: Arc<EventStore>,
    vector_store: Arc<VectorStore>,
    edges: Arc<EdgeRepo>,
    embedder: Arc<dyn Embedder>,
    config: MemoryConfig,
}

impl Retriever {
    pub fn new(
        event_store: Arc<EventStore>,
        vector_store: Arc<VectorStore>,
        edges: Arc<EdgeRepo>,
        embedder: Arc<dyn Embedder>,
        config: MemoryConfig,
    ) -> Self {
        Self { event_store, vector_store, edges, embedder, config }
    }

    pub fn retrieve(&self, query: &str, options: RetrieveOptions) -> Result<RetrieveResult> {
        let top_k = if options.top_k == 0 { 10 } else { options.top_k };
        let strategy = options.strategy.unwrap_or(Strategy::Hybrid);

        let mut scored = match strategy {
            Strategy::Fast => self.keyword_only(query, top_k)?,
            Strategy::Hybrid => self.hybrid(query, top_k)?,
            Strategy::Deep => {
                let mut hits = self.hybrid(query, top_k)?;
                self.expand_deep(&mut hits, top_k)?;
                hits
            }
        };

        scored.retain(|s| scope_matches(&s.event, &options.scope));
        if let Some(min_score) = options.min_score {
            scored.retain(|s| s.score >= min_score);
        }
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        for s in &scored {
            self.event_store.touch_access(&s.event.id);
        }

        let best_match = scored.first().cloned();
        let confidence = match &best_match {
            None => Confidence::None,
            Some(m) if m.score >= self.config.retriever_high_threshold => Confidence::High,
            Some(m) if m.score >= self.config.retriever_min_score => Confidence::Suggested,
            Some(_) => Confidence::Low,
        };

        Ok(RetrieveResult { memories: scored, best_match, confidence })
    }

    fn keyword_only(&self, query: &str, top_k: usize) -> Result<Vec<ScoredEvent>> {
        let events = self.event_store.keyword_search(query, top_k)?;
        let n = events.len().max(1);
        Ok(events
            .into_iter()
            .enumerate()
            .map(|(i, event)| ScoredEvent { event, score: keyword_rank_score(i, n) })
            .collect())
    }

    /// Over-fetch `3*top_k` from the vector store and `2*top_k` from keyword
    /// search, merge by `event_id` taking the max of the two normalized
    /// scores.
    fn hybrid(&self, query: &str, top_k: usize) -> Result<Vec<ScoredEvent>> {
        let mut by_id: HashMap<String, ScoredEvent> = HashMap::new();

        if let Ok(query_vector) = self.embedder.embed(query) {
            let hits = self.vector_store.search(&query_vector, top_k * 3)?;
            for hit in hits {
                if let Some(event) = self.event_store.get(&hit.event_id)? {
                    let normalized = ((hit.score as f64) + 1.0) / 2.0;
                    by_id
                        .entry(hit.event_id.clone())
                        .and_modify(|existing| existing.score = existing.score.max(normalized))
                        .or_insert(ScoredEvent { event, score: normalized });
                }
            }
        } else {
            tracing::warn!("embedder unavailable during hybrid retrieve, falling back to keyword-only contribution");
        }

        let keyword_events = self.event_store.keyword_search(query, top_k * 2)?;
        let n = keyword_events.len().max(1);
        for (i, event) in keyword_events.into_iter().enumerate() {
            let score = keyword_rank_score(i, n);
            by_id
                .entry(event.id.clone())
                .and_modify(|existing| existing.score = existing.score.max(score))
                .or_insert(ScoredEvent { event, score });
        }

        Ok(by_id.into_values().collect())
    }

    /// 2-hop `evidence_of` expansion of the current hit set via C4.
    fn expand_deep(&self, hits: &mut Vec<ScoredEvent>, top_k: usize) -> Result<()> {
        let seed_ids: Vec<String> = hits.iter().map(|h| h.event.id.clone()).collect();
        let mut seen: std::collections::HashSet<String> = seed_ids.iter().cloned().collect();

        for id in seed_ids {
            for related_id in self.edges.find_related_entries(&id)? {
                if seen.insert(related_id.clone()) {
                    if let Some(event) = self.event_store.get(&related_id)? {
                        hits.push(ScoredEvent { event, score: self.config.retriever_min_score });
                    }
                }
            }
        }
        hits.truncate(top_k.max(hits.len().min(top_k * 2)));
        Ok(())
    }
}

/// Maps rank position to a `(0, 1]` score, highest rank first. Not a real
/// BM25 score (FTS5 `rank` is an internal ordering key, not comparable
/// across queries) but preserves ordering for the hybrid max-merge.
fn keyword_rank_score(index: usize, total: usize) -> f64 {
    1.0 - (index as f64 / total as f64) * 0.5
}

fn scope_matches(event: &Event, scope: &HashMap<String, String>) -> bool {
    scope.iter().all(|(path, expected)| {
        event
            .metadata
            .get_path(path)
            .and_then(MetaValue::as_str)
            .map(|actual| actual == expected)
            .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;

    fn setup() -> (Arc<EventStore>, Arc<VectorStore>, Arc<EdgeRepo>, Arc<dyn Embedder>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let event_store = Arc::new(EventStore::open_in_memory().unwrap());
        let vector_store = Arc::new(VectorStore::open(&dir.path().join("v.sqlite"), 256).unwrap());
        let edges = Arc::new(EdgeRepo::open_in_memory().unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new());
        (event_store, vector_store, edges, embedder, dir)
    }

    #[test]
    fn fast_strategy_ranks_keyword_match_first() {
        let (event_store, vector_store, edges, embedder, _dir) = setup();
        let e1 = event_store.append("user_prompt", "s1", None, None, "fix deployment issue with nginx", MetaValue::empty_map()).unwrap();
        event_store.append("user_prompt", "s1", None, None, "random unrelated text", MetaValue::empty_map()).unwrap();

        let retriever = Retriever::new(event_store, vector_store, edges, embedder, MemoryConfig::default());
        let result = retriever
            .retrieve("deployment", RetrieveOptions { top_k: 5, strategy: Some(Strategy::Fast), ..Default::default() })
            .unwrap();

        assert_eq!(result.memories[0].event.id, e1.id);
    }

    #[test]
    fn scope_filter_excludes_non_matching_events() {
        let (event_store, vector_store, edges, embedder, _dir) = setup();
        let mut meta_alpha = MetaValue::empty_map();
        meta_alpha.set_path("scope.project.id", MetaValue::scalar("alpha"));
        let alpha = event_store.append("user_prompt", "s1", None, None, "memory about alpha", meta_alpha).unwrap();

        let mut meta_beta = MetaValue::empty_map();
        meta_beta.set_path("scope.project.id", MetaValue::scalar("beta"));
        event_store.append("user_prompt", "s1", None, None, "memory about beta", meta_beta).unwrap();

        let retriever = Retriever::new(event_store, vector_store, edges, embedder, MemoryConfig::default());
        let mut scope = HashMap::new();
        scope.insert("scope.project.id".to_string(), "alpha".to_string());
        let result = retriever
            .retrieve("memory", RetrieveOptions { top_k: 5, strategy: Some(Strategy::Fast), scope, ..Default::default() })
            .unwrap();

        assert_eq!(result.memories.len(), 1);
        assert_eq!(result.memories[0].event.id, alpha.id);
    }

    #[test]
    fn confidence_none_when_no_results() {
        let (event_store, vector_store, edges, embedder, _dir) = setup();
        let retriever = Retriever::new(event_store, vector_store, edges, embedder, MemoryConfig::default());
        let result = retriever.retrieve("nothing matches", RetrieveOptions { top_k: 5, strategy: Some(Strategy::Fast), ..Default::default() }).unwrap();
        assert_eq!(result.confidence, Confidence::None);
        assert!(result.best_match.is_none());
    }
}
