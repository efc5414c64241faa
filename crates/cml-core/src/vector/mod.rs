//! Vector Store (C2): content-addressed vector index over embedded events.
//!
//! Adapted from the teacher's `search::vector::VectorIndex`. The teacher
//! keys the index by an arbitrary string; here `id == event_id` directly, so
//! no extra indirection is needed. The index lives in memory and is rebuilt
//! from the `node_embeddings` durability table on startup, mirroring the
//! teacher's `load_embeddings_into_index`.

#[cfg(feature = "vector-search")]
mod hnsw;

mod brute;

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use crate::memory::VectorRecord;
use crate::metadata::MetaValue;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorSearchError {
    IndexCreation(String),
    IndexAdd(String),
    IndexSearch(String),
    InvalidDimensions(usize, usize),
}

impl std::fmt::Display for VectorSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorSearchError::IndexCreation(e) => write!(f, "index creation failed: {e}"),
            VectorSearchError::IndexAdd(e) => write!(f, "failed to add vector: {e}"),
            VectorSearchError::IndexSearch(e) => write!(f, "search failed: {e}"),
            VectorSearchError::InvalidDimensions(expected, got) => {
                write!(f, "invalid dimensions: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for VectorSearchError {}

impl From<VectorSearchError> for crate::error::MemoryError {
    fn from(e: VectorSearchError) -> Self {
        crate::error::MemoryError::VectorStore(e.to_string())
    }
}

#[cfg(feature = "vector-search")]
type Backend = hnsw::HnswIndex;
#[cfg(not(feature = "vector-search"))]
type Backend = brute::BruteForceIndex;

/// A scored search hit (spec.md §4.2 contract).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub event_id: String,
    pub score: f32,
    pub content: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
}

pub struct VectorStore {
    conn: Mutex<Connection>,
    index: Mutex<Backend>,
    records: Mutex<std::collections::HashMap<String, VectorRecord>>,
    dimensions: usize,
}

impl VectorStore {
    /// Open (or create) the durability table at `db_path` and rebuild the
    /// in-memory index from it.
    pub fn open(db_path: &std::path::Path, dimensions: usize) -> crate::error::Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;
             CREATE TABLE IF NOT EXISTS node_embeddings (
                 event_id   TEXT PRIMARY KEY,
                 session_id TEXT NOT NULL,
                 event_type TEXT NOT NULL,
                 content    TEXT NOT NULL,
                 vector     BLOB NOT NULL,
                 timestamp  TEXT NOT NULL,
                 metadata   TEXT NOT NULL DEFAULT '{}'
             );",
        )?;

        let index = Backend::new(dimensions).map_err(VectorSearchError::from)?;
        let store = Self {
            conn: Mutex::new(conn),
            index: Mutex::new(index),
            records: Mutex::new(std::collections::HashMap::new()),
            dimensions,
        };
        store.load_embeddings_into_index()?;
        Ok(store)
    }

    fn load_embeddings_into_index(&self) -> crate::error::Result<()> {
        let conn = self.conn.lock().expect("vector store connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT event_id, session_id, event_type, content, vector, timestamp, metadata FROM node_embeddings",
        )?;
        let rows = stmt.query_map([], |row| {
            let vector_bytes: Vec<u8> = row.get(4)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                vector_bytes,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut index = self.index.lock().expect("vector index poisoned");
        let mut records = self.records.lock().expect("vector records poisoned");
        for row in rows {
            let (event_id, session_id, event_type, content, vector_bytes, timestamp, metadata) = row?;
            let vector = bytes_to_vector(&vector_bytes);
            let timestamp = DateTime::parse_from_rfc3339(&timestamp)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            let metadata = MetaValue::from_json_str(&metadata).unwrap_or_default();

            index
                .add(&event_id, &vector)
                .map_err(VectorSearchError::from)?;
            records.insert(
                event_id.clone(),
                VectorRecord { id: event_id.clone(), event_id, session_id, event_type, content, vector, timestamp, metadata },
            );
        }
        Ok(())
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn count(&self) -> usize {
        self.index.lock().expect("vector index poisoned").len()
    }

    /// Idempotent by `id` (== `event_id`).
    pub fn upsert(&self, record: &VectorRecord) -> crate::error::Result<()> {
        if record.vector.len() != self.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.dimensions, record.vector.len()).into());
        }

        {
            let conn = self.conn.lock().expect("vector store connection poisoned");
            conn.execute(
                "INSERT INTO node_embeddings (event_id, session_id, event_type, content, vector, timestamp, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(event_id) DO UPDATE SET
                     session_id = excluded.session_id,
                     event_type = excluded.event_type,
                     content = excluded.content,
                     vector = excluded.vector,
                     timestamp = excluded.timestamp,
                     metadata = excluded.metadata",
                params![
                    record.event_id,
                    record.session_id,
                    record.event_type,
                    record.content,
                    vector_to_bytes(&record.vector),
                    record.timestamp.to_rfc3339(),
                    record.metadata.to_json_string(),
                ],
            )?;
        }

        self.index
            .lock()
            .expect("vector index poisoned")
            .add(&record.event_id, &record.vector)
            .map_err(VectorSearchError::from)?;
        self.records
            .lock()
            .expect("vector records poisoned")
            .insert(record.event_id.clone(), record.clone());
        Ok(())
    }

    pub fn upsert_batch(&self, records: &[VectorRecord]) -> crate::error::Result<()> {
        for record in records {
            self.upsert(record)?;
        }
        Ok(())
    }

    pub fn delete(&self, event_id: &str) -> crate::error::Result<bool> {
        let conn = self.conn.lock().expect("vector store connection poisoned");
        conn.execute("DELETE FROM node_embeddings WHERE event_id = ?1", params![event_id])?;
        drop(conn);

        self.records.lock().expect("vector records poisoned").remove(event_id);
        Ok(self.index.lock().expect("vector index poisoned").remove(event_id).map_err(VectorSearchError::from)?)
    }

    /// Cosine search over pre-normalized vectors, at most `top_k` results,
    /// descending score, ties broken by more recent timestamp.
    pub fn search(&self, query_vector: &[f32], top_k: usize) -> crate::error::Result<Vec<VectorHit>> {
        let raw = self
            .index
            .lock()
            .expect("vector index poisoned")
            .search(query_vector, top_k)
            .map_err(VectorSearchError::from)?;

        let records = self.records.lock().expect("vector records poisoned");
        let mut hits: Vec<VectorHit> = raw
            .into_iter()
            .filter_map(|(event_id, score)| {
                records.get(&event_id).map(|r| VectorHit {
                    id: r.id.clone(),
                    event_id: r.event_id.clone(),
                    score,
                    content: r.content.clone(),
                    event_type: r.event_type.clone(),
                    timestamp: r.timestamp,
                    session_id: r.session_id.clone(),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.timestamp.cmp(&a.timestamp))
        });
        hits.truncate(top_k);
        Ok(hits)
    }
}

fn vector_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
