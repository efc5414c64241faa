//! Shared Store & Promoter (C6): cross-project troubleshooting knowledge
//! (spec.md §4.6). Upsert-on-conflict max-merge mirrors the teacher's
//! update-in-place idiom used throughout `storage::sqlite`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::MemoryConfig;
use crate::embeddings::Embedder;
use crate::error::Result;
use crate::memory::{SharedTroubleshootingEntry, VectorRecord};
use crate::vector::VectorStore;

/// Candidate local entry considered for promotion (spec.md §4.6
/// eligibility: `event_type = troubleshooting`, `stage`, `status`,
/// `confidence`).
#[derive(Debug, Clone)]
pub struct PromotionCandidate {
    pub source_entry_id: String,
    pub event_type: String,
    pub stage: String,
    pub status: String,
    pub confidence: f64,
    pub title: String,
    pub symptoms: Vec<String>,
    pub root_cause: String,
    pub solution: String,
    pub topics: Vec<String>,
    pub technologies: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    Created,
    Merged,
    SkippedIneligible,
}

pub struct SharedStore {
    conn: std::sync::Mutex<Connection>,
    vector_store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl SharedStore {
    pub fn open(db_path: &std::path::Path, vector_store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(Self { conn: std::sync::Mutex::new(conn), vector_store, embedder })
    }

    #[cfg(test)]
    pub fn open_in_memory(vector_store: Arc<VectorStore>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS shared_troubleshooting (
                entry_id              TEXT PRIMARY KEY,
                source_project_hash   TEXT NOT NULL,
                source_entry_id       TEXT NOT NULL,
                title                 TEXT NOT NULL,
                symptoms              TEXT NOT NULL DEFAULT '[]',
                root_cause            TEXT NOT NULL,
                solution              TEXT NOT NULL,
                topics                TEXT NOT NULL DEFAULT '[]',
                technologies          TEXT NOT NULL DEFAULT '[]',
                confidence            REAL NOT NULL,
                usage_count           INTEGER NOT NULL DEFAULT 0,
                last_used_at          TEXT,
                promoted_at           TEXT NOT NULL,
                UNIQUE(source_project_hash, source_entry_id)
            );",
        )?;
        Ok(Self { conn: std::sync::Mutex::new(conn), vector_store, embedder })
    }

    /// spec.md §4.6: eligibility check, then `INSERT ... ON CONFLICT`
    /// max-merge on `confidence` with a full field refresh. Already-present
    /// rows below the new confidence still refresh non-confidence fields;
    /// rows at-or-above the new confidence short-circuit as skip.
    pub fn promote_entry(
        &self,
        source_project_hash: &str,
        candidate: &PromotionCandidate,
        config: &MemoryConfig,
    ) -> Result<(PromotionOutcome, SharedTroubleshootingEntry)> {
        if candidate.event_type != "troubleshooting"
            || !matches!(candidate.stage.as_str(), "verified" | "certified")
            || candidate.status != "active"
            || candidate.confidence < config.min_confidence_for_promotion
        {
            return Err(crate::error::MemoryError::Validation(format!(
                "entry '{}' is not eligible for promotion",
                candidate.source_entry_id
            )));
        }

        let conn = self.conn.lock().expect("shared store connection poisoned");
        let existing = find_by_source(&conn, source_project_hash, &candidate.source_entry_id)?;

        let merged_confidence = existing.as_ref().map_or(candidate.confidence, |e| e.confidence.max(candidate.confidence));
        let now = Utc::now();
        let entry_id = existing.as_ref().map(|e| e.entry_id.clone()).unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        conn.execute(
            "INSERT INTO shared_troubleshooting
                (entry_id, source_project_hash, source_entry_id, title, symptoms, root_cause, solution, topics, technologies, confidence, usage_count, last_used_at, promoted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0, NULL, ?11)
             ON CONFLICT(source_project_hash, source_entry_id) DO UPDATE SET
                title = excluded.title,
                symptoms = excluded.symptoms,
                root_cause = excluded.root_cause,
                solution = excluded.solution,
                topics = excluded.topics,
                technologies = excluded.technologies,
                confidence = MAX(shared_troubleshooting.confidence, excluded.confidence)",
            params![
                entry_id,
                source_project_hash,
                candidate.source_entry_id,
                candidate.title,
                serde_json::to_string(&candidate.symptoms).unwrap_or_default(),
                candidate.root_cause,
                candidate.solution,
                serde_json::to_string(&candidate.topics).unwrap_or_default(),
                serde_json::to_string(&candidate.technologies).unwrap_or_default(),
                candidate.confidence,
                now.to_rfc3339(),
            ],
        )?;

        let outcome = if existing.is_some() { PromotionOutcome::Merged } else { PromotionOutcome::Created };
        let entry = find_by_source(&conn, source_project_hash, &candidate.source_entry_id)?
            .expect("row just written must be readable");
        debug_assert!((entry.confidence - merged_confidence).abs() < 1e-9);
        drop(conn);

        self.emit_shared_vector(&entry)?;

        Ok((outcome, entry))
    }

    /// spec.md §4.6: every promotion (create or merge) also embeds a
    /// canonicalized multi-line rendering of the entry and upserts it into
    /// the shared vector space, keyed by `entry_id` so a later merge
    /// overwrites the same record rather than accumulating stale ones.
    fn emit_shared_vector(&self, entry: &SharedTroubleshootingEntry) -> Result<()> {
        let canonical = canonicalize_entry(entry);
        let vector = self.embedder.embed(&canonical)?;
        self.vector_store.upsert(&VectorRecord {
            id: entry.entry_id.clone(),
            event_id: entry.entry_id.clone(),
            session_id: "shared".to_string(),
            event_type: "shared_troubleshooting".to_string(),
            content: canonical,
            vector,
            timestamp: Utc::now(),
            metadata: crate::metadata::MetaValue::empty_map(),
        })
    }

    pub fn record_usage(&self, entry_id: &str) -> Result<()> {
        let conn = self.conn.lock().expect("shared store connection poisoned");
        conn.execute(
            "UPDATE shared_troubleshooting SET usage_count = usage_count + 1, last_used_at = ?1 WHERE entry_id = ?2",
            params![Utc::now().to_rfc3339(), entry_id],
        )?;
        Ok(())
    }

    /// Text search fan-out across `title`/`root_cause`/`solution`, floor on
    /// `confidence`, ranked `confidence desc, usage_count desc`.
    pub fn search_text(&self, query: &str, min_confidence: f64, limit: usize) -> Result<Vec<SharedTroubleshootingEntry>> {
        let conn = self.conn.lock().expect("shared store connection poisoned");
        let like = format!("%{}%", query.replace('%', "").replace('_', ""));
        let mut stmt = conn.prepare(
            "SELECT entry_id, source_project_hash, source_entry_id, title, symptoms, root_cause, solution, topics, technologies, confidence, usage_count, last_used_at, promoted_at
             FROM shared_troubleshooting
             WHERE confidence >= ?1 AND (title LIKE ?2 OR root_cause LIKE ?2 OR solution LIKE ?2)
             ORDER BY confidence DESC, usage_count DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![min_confidence, like, limit as i64], row_to_entry)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }

    /// Topic search (`topics LIKE '%"topic"%'`), optionally excluding a
    /// source project hash.
    pub fn search_topic(&self, topic: &str, exclude_project_hash: Option<&str>, limit: usize) -> Result<Vec<SharedTroubleshootingEntry>> {
        let conn = self.conn.lock().expect("shared store connection poisoned");
        let like = format!("%\"{}\"%", topic.replace('%', "").replace('_', ""));

        let rows: Vec<SharedTroubleshootingEntry> = match exclude_project_hash {
            Some(hash) => {
                let mut stmt = conn.prepare(
                    "SELECT entry_id, source_project_hash, source_entry_id, title, symptoms, root_cause, solution, topics, technologies, confidence, usage_count, last_used_at, promoted_at
                     FROM shared_troubleshooting WHERE topics LIKE ?1 AND source_project_hash != ?2
                     ORDER BY confidence DESC, usage_count DESC LIMIT ?3",
                )?;
                stmt.query_map(params![like, hash, limit as i64], row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    "SELECT entry_id, source_project_hash, source_entry_id, title, symptoms, root_cause, solution, topics, technologies, confidence, usage_count, last_used_at, promoted_at
                     FROM shared_troubleshooting WHERE topics LIKE ?1
                     ORDER BY confidence DESC, usage_count DESC LIMIT ?2",
                )?;
                stmt.query_map(params![like, limit as i64], row_to_entry)?.collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(rows)
    }
}

/// Canonical multi-line rendering an entry embeds to (spec.md §4.6): one
/// field per line, stable field order, so the same entry always produces
/// the same text regardless of how its struct fields were populated.
fn canonicalize_entry(entry: &SharedTroubleshootingEntry) -> String {
    format!(
        "title: {}\nsymptoms: {}\nroot_cause: {}\nsolution: {}\ntopics: {}\ntechnologies: {}",
        entry.title,
        entry.symptoms.join("; "),
        entry.root_cause,
        entry.solution,
        entry.topics.join(", "),
        entry.technologies.join(", "),
    )
}

fn find_by_source(conn: &Connection, source_project_hash: &str, source_entry_id: &str) -> Result<Option<SharedTroubleshootingEntry>> {
    conn.query_row(
        "SELECT entry_id, source_project_hash, source_entry_id, title, symptoms, root_cause, solution, topics, technologies, confidence, usage_count, last_used_at, promoted_at
         FROM shared_troubleshooting WHERE source_project_hash = ?1 AND source_entry_id = ?2",
        params![source_project_hash, source_entry_id],
        row_to_entry,
    )
    .optional()
    .map_err(crate::error::MemoryError::from)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<SharedTroubleshootingEntry> {
    let symptoms: String = row.get(4)?;
    let topics: String = row.get(7)?;
    let technologies: String = row.get(8)?;
    let last_used_at: Option<String> = row.get(11)?;
    let promoted_at: String = row.get(12)?;

    Ok(SharedTroubleshootingEntry {
        entry_id: row.get(0)?,
        source_project_hash: row.get(1)?,
        source_entry_id: row.get(2)?,
        title: row.get(3)?,
        symptoms: serde_json::from_str(&symptoms).unwrap_or_default(),
        root_cause: row.get(5)?,
        solution: row.get(6)?,
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        technologies: serde_json::from_str(&technologies).unwrap_or_default(),
        confidence: row.get(9)?,
        usage_count: row.get::<_, i64>(10)? as u64,
        last_used_at: last_used_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|d| d.with_timezone(&Utc)),
        promoted_at: DateTime::parse_from_rfc3339(&promoted_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::HashingEmbedder;

    fn store() -> (SharedStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new());
        let vector_store = Arc::new(VectorStore::open(&dir.path().join("vectors.sqlite"), embedder.dimensions()).unwrap());
        let store = SharedStore::open_in_memory(vector_store, embedder).unwrap();
        (store, dir)
    }

    fn candidate(confidence: f64) -> PromotionCandidate {
        PromotionCandidate {
            source_entry_id: "local-1".to_string(),
            event_type: "troubleshooting".to_string(),
            stage: "verified".to_string(),
            status: "active".to_string(),
            confidence,
            title: "nginx 502".to_string(),
            symptoms: vec!["502 bad gateway".to_string()],
            root_cause: "upstream timeout".to_string(),
            solution: "increase proxy_read_timeout".to_string(),
            topics: vec!["nginx".to_string(), "deployment".to_string()],
            technologies: vec!["nginx".to_string()],
        }
    }

    #[test]
    fn promotion_is_idempotent_with_max_merge() {
        let (store, _dir) = store();
        let config = MemoryConfig::default();

        let (outcome1, entry1) = store.promote_entry("hash1", &candidate(0.9), &config).unwrap();
        assert_eq!(outcome1, PromotionOutcome::Created);
        assert_eq!(entry1.confidence, 0.9);

        let (outcome2, entry2) = store.promote_entry("hash1", &candidate(0.7), &config).unwrap();
        assert_eq!(outcome2, PromotionOutcome::Merged);
        assert_eq!(entry2.confidence, 0.9);
        assert_eq!(entry1.entry_id, entry2.entry_id);
    }

    #[test]
    fn ineligible_candidate_is_rejected() {
        let (store, _dir) = store();
        let config = MemoryConfig::default();
        let mut bad = candidate(0.3);
        bad.stage = "draft".to_string();
        assert!(store.promote_entry("hash1", &bad, &config).is_err());
    }

    #[test]
    fn record_usage_increments_count() {
        let (store, _dir) = store();
        let config = MemoryConfig::default();
        let (_, entry) = store.promote_entry("hash1", &candidate(0.9), &config).unwrap();
        store.record_usage(&entry.entry_id).unwrap();
        store.record_usage(&entry.entry_id).unwrap();

        let found = store.search_text("nginx", 0.5, 10).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].usage_count, 2);
    }

    #[test]
    fn topic_search_excludes_project_hash() {
        let (store, _dir) = store();
        let config = MemoryConfig::default();
        store.promote_entry("hash1", &candidate(0.9), &config).unwrap();

        let found = store.search_topic("nginx", Some("hash1"), 10).unwrap();
        assert!(found.is_empty());
        let found_all = store.search_topic("nginx", None, 10).unwrap();
        assert_eq!(found_all.len(), 1);
    }

    #[test]
    fn promotion_emits_a_shared_vector_record() {
        let (store, _dir) = store();
        let config = MemoryConfig::default();
        let (_, entry) = store.promote_entry("hash1", &candidate(0.9), &config).unwrap();

        assert_eq!(store.vector_store.count(), 1);
        let query = HashingEmbedder::new().embed(&canonicalize_entry(&entry)).unwrap();
        let hits = store.vector_store.search(&query, 1).unwrap();
        assert_eq!(hits[0].event_id, entry.entry_id);

        // A re-promotion (merge) overwrites the same vector record rather
        // than accumulating a second one.
        store.promote_entry("hash1", &candidate(0.95), &config).unwrap();
        assert_eq!(store.vector_store.count(), 1);
    }
}
