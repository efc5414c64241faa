//! Continuity Manager (C8): transition scoring between context snapshots
//! (spec.md §4.8). Extraction is lexical pattern-matching with dedup and
//! size caps, in the spirit of the teacher's keyword-driven sentiment
//! heuristics generalized to topic/file/entity extraction.

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::memory::{ContinuityLog, TransitionType};

const MAX_TOPICS: usize = 10;
const MAX_FILES: usize = 10;
const MAX_ENTITIES: usize = 20;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "to", "of", "and", "or", "in", "on", "for",
    "with", "this", "that", "it", "as", "at", "by", "be", "i", "you", "we",
];

#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub topics: Vec<String>,
    pub files: Vec<String>,
    pub entities: Vec<String>,
}

impl ContextSnapshot {
    /// Lexical extraction from free text plus any file paths already known
    /// to the caller (e.g. from tool observations). No NLU, per spec.md §1.
    pub fn extract(id: impl Into<String>, text: &str, known_files: &[String]) -> Self {
        let tokens: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '_' && c != '.' && c != '/')
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();

        let mut topic_counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut files: Vec<String> = known_files.to_vec();
        let mut entities: Vec<String> = Vec::new();

        for token in &tokens {
            let lower = token.to_lowercase();
            if lower.len() < 3 || STOPWORDS.contains(&lower.as_str()) {
                continue;
            }
            if token.contains('/') || token.contains('.') && token.len() > 3 {
                files.push(token.clone());
                continue;
            }
            if token.chars().next().is_some_and(|c| c.is_uppercase()) {
                entities.push(token.clone());
            }
            *topic_counts.entry(lower).or_insert(0) += 1;
        }

        let mut topics: Vec<(String, usize)> = topic_counts.into_iter().collect();
        topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let topics: Vec<String> = topics.into_iter().take(MAX_TOPICS).map(|(t, _)| t).collect();

        dedup_cap(&mut files, MAX_FILES);
        dedup_cap(&mut entities, MAX_ENTITIES);

        Self { id: id.into(), timestamp: Utc::now(), topics, files, entities }
    }
}

fn dedup_cap(items: &mut Vec<String>, cap: usize) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
    items.truncate(cap);
}

fn jaccard_lower(a: &[String], b: &[String]) -> f64 {
    use std::collections::HashSet;
    let sa: HashSet<String> = a.iter().map(|s| s.to_lowercase()).collect();
    let sb: HashSet<String> = b.iter().map(|s| s.to_lowercase()).collect();
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let union = sa.union(&sb).count();
    if union == 0 {
        0.0
    } else {
        sa.intersection(&sb).count() as f64 / union as f64
    }
}

/// spec.md §4.8 weighted-sum score.
pub fn continuity_score(from: &ContextSnapshot, to: &ContextSnapshot, decay_hours: f64) -> f64 {
    let topic_j = jaccard_lower(&from.topics, &to.topics);
    let file_j = jaccard_lower(&from.files, &to.files);
    let entity_j = jaccard_lower(&from.entities, &to.entities);

    let delta_ms = (to.timestamp - from.timestamp).num_milliseconds().unsigned_abs() as f64;
    let time_term = (-delta_ms / (decay_hours * 3_600_000.0)).exp();

    (0.3 * topic_j + 0.2 * file_j + 0.3 * time_term + 0.2 * entity_j).clamp(0.0, 1.0)
}

pub fn classify_transition(score: f64, config: &MemoryConfig) -> TransitionType {
    if score >= config.min_score_for_seamless {
        TransitionType::Seamless
    } else if score >= 0.4 {
        TransitionType::TopicShift
    } else {
        TransitionType::Break
    }
}

/// Per-process continuity tracker: the "last context" is process-local
/// memory, by design (spec.md §5) — two processes scoring transitions
/// produce independent logs.
pub struct ContinuityManager {
    conn: std::sync::Mutex<rusqlite::Connection>,
    last_context: std::sync::Mutex<Option<ContextSnapshot>>,
    config: MemoryConfig,
}

impl ContinuityManager {
    pub fn open(db_path: &std::path::Path, config: MemoryConfig) -> Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(Self { conn: std::sync::Mutex::new(conn), last_context: std::sync::Mutex::new(None), config })
    }

    #[cfg(test)]
    pub fn open_in_memory(config: MemoryConfig) -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS continuity_log (
                log_id                TEXT PRIMARY KEY,
                from_context_id       TEXT NOT NULL,
                to_context_id         TEXT NOT NULL,
                score                 REAL NOT NULL,
                transition_type       TEXT NOT NULL,
                created_at            TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn: std::sync::Mutex::new(conn), last_context: std::sync::Mutex::new(None), config })
    }

    /// Scores `snapshot` against the stored last context (or treats this as
    /// the first context of the stream, scoring `1.0`/`seamless`), logs the
    /// transition, then stores `snapshot` as the new last context.
    pub fn observe(&self, snapshot: ContextSnapshot) -> Result<ContinuityLog> {
        let mut last = self.last_context.lock().expect("continuity last-context poisoned");
        let (from, score) = match last.as_ref() {
            Some(prev) => (prev.id.clone(), continuity_score(prev, &snapshot, self.config.continuity_decay_hours)),
            None => (snapshot.id.clone(), 1.0),
        };
        let transition_type = classify_transition(score, &self.config);

        let log = ContinuityLog {
            log_id: uuid::Uuid::new_v4().to_string(),
            from_context_id: from,
            to_context_id: snapshot.id.clone(),
            score,
            transition_type,
            created_at: Utc::now(),
        };

        let conn = self.conn.lock().expect("continuity log connection poisoned");
        conn.execute(
            "INSERT INTO continuity_log (log_id, from_context_id, to_context_id, score, transition_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![log.log_id, log.from_context_id, log.to_context_id, log.score, log.transition_type.as_str(), log.created_at.to_rfc3339()],
        )?;
        drop(conn);

        *last = Some(snapshot);
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_is_bounded() {
        let a = ContextSnapshot::extract("a", "deploying nginx to production server", &[]);
        let b = ContextSnapshot::extract("b", "completely unrelated text about cooking recipes", &[]);
        let score = continuity_score(&a, &b, 2.0);
        assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn self_transition_is_seamless() {
        let config = MemoryConfig::default();
        let snapshot = ContextSnapshot::extract("a", "deploying nginx to production server.rs", &[]);
        let score = continuity_score(&snapshot, &snapshot, config.continuity_decay_hours);
        assert!(score >= config.min_score_for_seamless);
    }

    #[test]
    fn observe_logs_and_updates_last_context() {
        let config = MemoryConfig::default();
        let manager = ContinuityManager::open_in_memory(config).unwrap();
        let a = ContextSnapshot::extract("a", "working on nginx deployment config.rs", &[]);
        let log1 = manager.observe(a.clone()).unwrap();
        assert_eq!(log1.transition_type, TransitionType::Seamless);

        let b = ContextSnapshot::extract("b", "working on nginx deployment config.rs", &[]);
        let log2 = manager.observe(b).unwrap();
        assert_eq!(log2.from_context_id, "a");
        assert!(log2.score >= config.min_score_for_seamless);
    }
}
