//! Durable storage for `ConsolidatedMemory`/`Rule` rows (C5), owned and
//! written only by the consolidation worker.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::memory::{ConsolidatedMemory, Rule};

pub struct ConsolidationStore {
    conn: std::sync::Mutex<Connection>,
}

impl ConsolidationStore {
    pub fn open(db_path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS consolidated_memories (
                memory_id           TEXT PRIMARY KEY,
                summary              TEXT NOT NULL,
                topics                TEXT NOT NULL DEFAULT '[]',
                source_event_ids      TEXT NOT NULL DEFAULT '[]',
                source_ids_hash       TEXT NOT NULL,
                confidence            REAL NOT NULL,
                created_at            TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_consolidated_source_hash ON consolidated_memories(source_ids_hash);
            CREATE TABLE IF NOT EXISTS rules (
                rule_id               TEXT PRIMARY KEY,
                text                  TEXT NOT NULL,
                source_memory_ids     TEXT NOT NULL DEFAULT '[]',
                confidence            REAL NOT NULL,
                source_memory_id      TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rules_source_memory ON rules(source_memory_id);",
        )?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    /// Hashed set identity over `source_event_ids` (order-independent),
    /// spec.md §4.5 step 3.
    pub fn source_ids_hash(source_event_ids: &[String]) -> String {
        let mut sorted = source_event_ids.to_vec();
        sorted.sort();
        let mut hasher = Sha256::new();
        for id in &sorted {
            hasher.update(id.as_bytes());
            hasher.update(b"\x1f");
        }
        hasher.finalize().iter().fold(String::new(), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        })
    }

    /// Returns `None` (no row written) if a memory with the same source-set
    /// identity already exists.
    pub fn insert_memory_if_new(&self, memory: &ConsolidatedMemory) -> Result<Option<ConsolidatedMemory>> {
        let conn = self.conn.lock().expect("consolidation store connection poisoned");
        let hash = Self::source_ids_hash(&memory.source_event_ids);

        let exists: Option<String> =
            conn.query_row("SELECT memory_id FROM consolidated_memories WHERE source_ids_hash = ?1", params![hash], |r| r.get(0)).optional()?;
        if exists.is_some() {
            return Ok(None);
        }

        conn.execute(
            "INSERT INTO consolidated_memories (memory_id, summary, topics, source_event_ids, source_ids_hash, confidence, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                memory.memory_id,
                memory.summary,
                serde_json::to_string(&memory.topics).unwrap_or_default(),
                serde_json::to_string(&memory.source_event_ids).unwrap_or_default(),
                hash,
                memory.confidence,
                memory.created_at.to_rfc3339(),
            ],
        )?;
        Ok(Some(memory.clone()))
    }

    /// Count prior consolidations whose topic set intersects `topics` (used
    /// as the recurrence signal for rule promotion).
    pub fn count_recurring_topic_sets(&self, topics: &[String]) -> Result<usize> {
        let conn = self.conn.lock().expect("consolidation store connection poisoned");
        let mut stmt = conn.prepare("SELECT topics FROM consolidated_memories")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;

        let target: std::collections::HashSet<&str> = topics.iter().map(String::as_str).collect();
        let mut count = 0usize;
        for row in rows {
            let topics_json = row?;
            let other: Vec<String> = serde_json::from_str(&topics_json).unwrap_or_default();
            let other_set: std::collections::HashSet<&str> = other.iter().map(String::as_str).collect();
            if !target.is_empty() && !other_set.is_disjoint(&target) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Idempotent: at most one rule per `source_memory_id`.
    pub fn promote_rule_if_new(&self, source_memory_id: &str, text: &str, source_memory_ids: &[String], confidence: f64) -> Result<Option<Rule>> {
        let conn = self.conn.lock().expect("consolidation store connection poisoned");
        let exists: Option<String> =
            conn.query_row("SELECT rule_id FROM rules WHERE source_memory_id = ?1", params![source_memory_id], |r| r.get(0)).optional()?;
        if exists.is_some() {
            return Ok(None);
        }

        let rule = Rule {
            rule_id: uuid::Uuid::new_v4().to_string(),
            text: text.to_string(),
            source_memory_ids: source_memory_ids.to_vec(),
            confidence,
        };
        conn.execute(
            "INSERT INTO rules (rule_id, text, source_memory_ids, confidence, source_memory_id) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![rule.rule_id, rule.text, serde_json::to_string(&rule.source_memory_ids).unwrap_or_default(), rule.confidence, source_memory_id],
        )?;
        Ok(Some(rule))
    }

    pub fn all_memories(&self) -> Result<Vec<ConsolidatedMemory>> {
        let conn = self.conn.lock().expect("consolidation store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT memory_id, summary, topics, source_event_ids, confidence, created_at FROM consolidated_memories ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let topics: String = row.get(2)?;
            let source_event_ids: String = row.get(3)?;
            let created_at: String = row.get(5)?;
            Ok(ConsolidatedMemory {
                memory_id: row.get(0)?,
                summary: row.get(1)?,
                topics: serde_json::from_str(&topics).unwrap_or_default(),
                source_event_ids: serde_json::from_str(&source_event_ids).unwrap_or_default(),
                confidence: row.get(4)?,
                created_at: DateTime::parse_from_rfc3339(&created_at).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }
}
