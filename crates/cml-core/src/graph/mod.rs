//! Edge/Entity Repo (C4): typed relations between nodes (spec.md §4.4).
//!
//! Table design adapted from the teacher's migration-tracked graph tables
//! (source/target/type/meta columns, uniqueness on the triple), generalized
//! to this system's narrower `RelType` set. Traversals are iterative joins,
//! never recursive pointer chases (spec.md §9).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;
use crate::memory::{Edge, RelType};
use crate::metadata::MetaValue;

pub struct EdgeRepo {
    conn: std::sync::Mutex<Connection>,
}

impl EdgeRepo {
    /// Opens a dedicated connection over the same database file as the event
    /// store; `edges` is owned and written only by this component.
    pub fn open(db_path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA busy_timeout=5000;")?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS edges (
                edge_id         TEXT PRIMARY KEY,
                src_type        TEXT NOT NULL,
                src_id          TEXT NOT NULL,
                rel_type        TEXT NOT NULL,
                dst_type        TEXT NOT NULL,
                dst_id          TEXT NOT NULL,
                meta            TEXT NOT NULL DEFAULT '{}',
                created_at      TEXT NOT NULL,
                UNIQUE(src_id, rel_type, dst_id)
            );
            CREATE INDEX IF NOT EXISTS idx_edges_src ON edges(src_id);
            CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst_id);",
        )?;
        Ok(Self { conn: std::sync::Mutex::new(conn) })
    }

    /// Idempotent on `(src_id, rel_type, dst_id)`: a repeat `create` with the
    /// same triple returns the existing edge rather than erroring.
    pub fn create(
        &self,
        src_type: &str,
        src_id: &str,
        rel_type: RelType,
        dst_type: &str,
        dst_id: &str,
        meta: MetaValue,
    ) -> Result<Edge> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        if let Some(existing) = find_by_triple(&conn, src_id, rel_type, dst_id)? {
            return Ok(existing);
        }

        let edge = Edge {
            edge_id: uuid::Uuid::new_v4().to_string(),
            src_type: src_type.to_string(),
            src_id: src_id.to_string(),
            rel_type,
            dst_type: dst_type.to_string(),
            dst_id: dst_id.to_string(),
            meta,
            created_at: Utc::now(),
        };
        insert_edge(&conn, &edge)?;
        Ok(edge)
    }

    /// Replace an existing edge's `meta`, or insert if absent.
    pub fn upsert(
        &self,
        src_type: &str,
        src_id: &str,
        rel_type: RelType,
        dst_type: &str,
        dst_id: &str,
        meta: MetaValue,
    ) -> Result<Edge> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        if let Some(mut existing) = find_by_triple(&conn, src_id, rel_type, dst_id)? {
            conn.execute(
                "UPDATE edges SET meta = ?1 WHERE edge_id = ?2",
                params![meta.to_json_string(), existing.edge_id],
            )?;
            existing.meta = meta;
            return Ok(existing);
        }

        let edge = Edge {
            edge_id: uuid::Uuid::new_v4().to_string(),
            src_type: src_type.to_string(),
            src_id: src_id.to_string(),
            rel_type,
            dst_type: dst_type.to_string(),
            dst_id: dst_id.to_string(),
            meta,
            created_at: Utc::now(),
        };
        insert_edge(&conn, &edge)?;
        Ok(edge)
    }

    pub fn find_by_src(&self, src_id: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT edge_id, src_type, src_id, rel_type, dst_type, dst_id, meta, created_at
             FROM edges WHERE src_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![src_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }

    pub fn find_by_dst(&self, dst_id: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT edge_id, src_type, src_id, rel_type, dst_type, dst_id, meta, created_at
             FROM edges WHERE dst_id = ?1 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![dst_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }

    pub fn find_by_endpoints(&self, src_id: &str, dst_id: &str) -> Result<Vec<Edge>> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT edge_id, src_type, src_id, rel_type, dst_type, dst_id, meta, created_at
             FROM edges WHERE src_id = ?1 AND dst_id = ?2 ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![src_id, dst_id], row_to_edge)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }

    /// Returns `0` when the driver does not surface an affected-row count for
    /// the delete (spec.md §9 Open Question, left unresolved in the source);
    /// callers must not rely on the return value to detect "no such edge".
    pub fn delete(&self, edge_id: &str) -> Result<usize> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        let n = conn.execute("DELETE FROM edges WHERE edge_id = ?1", params![edge_id])?;
        Ok(n)
    }

    /// Transactional delete-then-insert of every edge out of `src_id` with
    /// `rel_type`.
    pub fn replace_edges(
        &self,
        src_id: &str,
        rel_type: RelType,
        edges: &[(String, String, MetaValue)],
    ) -> Result<Vec<Edge>> {
        let mut conn = self.conn.lock().expect("edge repo connection poisoned");
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM edges WHERE src_id = ?1 AND rel_type = ?2",
            params![src_id, rel_type.as_str()],
        )?;

        let mut created = Vec::with_capacity(edges.len());
        for (dst_type, dst_id, meta) in edges {
            let edge = Edge {
                edge_id: uuid::Uuid::new_v4().to_string(),
                src_type: String::new(),
                src_id: src_id.to_string(),
                rel_type,
                dst_type: dst_type.clone(),
                dst_id: dst_id.clone(),
                meta: meta.clone(),
                created_at: Utc::now(),
            };
            insert_edge(&tx, &edge)?;
            created.push(edge);
        }
        tx.commit()?;
        Ok(created)
    }

    /// `blocked_by` targets resolved through a single `resolves_to` hop: a
    /// blocker that itself `resolves_to` something is treated as resolved and
    /// excluded.
    pub fn get_effective_blockers(&self, task_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT b.dst_id FROM edges b
             WHERE b.src_id = ?1 AND b.rel_type = 'blocked_by'
               AND NOT EXISTS (
                   SELECT 1 FROM edges r WHERE r.src_id = b.dst_id AND r.rel_type = 'resolves_to'
               )",
        )?;
        let rows = stmt.query_map(params![task_id], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }

    /// 2-hop `evidence_of -> evidence_of` self-join, excluding the source.
    pub fn find_related_entries(&self, entry_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().expect("edge repo connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT DISTINCT e2.dst_id FROM edges e1
             JOIN edges e2 ON e1.dst_id = e2.src_id
             WHERE e1.src_id = ?1 AND e1.rel_type = 'evidence_of' AND e2.rel_type = 'evidence_of'
               AND e2.dst_id != ?1",
        )?;
        let rows = stmt.query_map(params![entry_id], |row| row.get::<_, String>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(crate::error::MemoryError::from)
    }
}

fn insert_edge(conn: &Connection, edge: &Edge) -> Result<()> {
    conn.execute(
        "INSERT INTO edges (edge_id, src_type, src_id, rel_type, dst_type, dst_id, meta, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            edge.edge_id,
            edge.src_type,
            edge.src_id,
            edge.rel_type.as_str(),
            edge.dst_type,
            edge.dst_id,
            edge.meta.to_json_string(),
            edge.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

fn find_by_triple(conn: &Connection, src_id: &str, rel_type: RelType, dst_id: &str) -> Result<Option<Edge>> {
    conn.query_row(
        "SELECT edge_id, src_type, src_id, rel_type, dst_type, dst_id, meta, created_at
         FROM edges WHERE src_id = ?1 AND rel_type = ?2 AND dst_id = ?3",
        params![src_id, rel_type.as_str(), dst_id],
        row_to_edge,
    )
    .optional()
    .map_err(crate::error::MemoryError::from)
}

fn row_to_edge(row: &rusqlite::Row) -> rusqlite::Result<Edge> {
    let rel_type_str: String = row.get(3)?;
    let meta_str: String = row.get(6)?;
    let created_at_str: String = row.get(7)?;
    Ok(Edge {
        edge_id: row.get(0)?,
        src_type: row.get(1)?,
        src_id: row.get(2)?,
        rel_type: RelType::parse(&rel_type_str).unwrap_or(RelType::Cites),
        dst_type: row.get(4)?,
        dst_id: row.get(5)?,
        meta: MetaValue::from_json_str(&meta_str).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_idempotent_on_triple() {
        let repo = EdgeRepo::open_in_memory().unwrap();
        let a = repo.create("entry", "e1", RelType::EvidenceOf, "entry", "e2", MetaValue::empty_map()).unwrap();
        let b = repo.create("entry", "e1", RelType::EvidenceOf, "entry", "e2", MetaValue::empty_map()).unwrap();
        assert_eq!(a.edge_id, b.edge_id);
        assert_eq!(repo.find_by_src("e1").unwrap().len(), 1);
    }

    #[test]
    fn effective_blockers_excludes_resolved() {
        let repo = EdgeRepo::open_in_memory().unwrap();
        repo.create("task", "t1", RelType::BlockedBy, "task", "blocker-a", MetaValue::empty_map()).unwrap();
        repo.create("task", "t1", RelType::BlockedBy, "task", "blocker-b", MetaValue::empty_map()).unwrap();
        repo.create("task", "blocker-b", RelType::ResolvesTo, "task", "t1", MetaValue::empty_map()).unwrap();

        let blockers = repo.get_effective_blockers("t1").unwrap();
        assert_eq!(blockers, vec!["blocker-a".to_string()]);
    }

    #[test]
    fn related_entries_two_hop_excludes_source() {
        let repo = EdgeRepo::open_in_memory().unwrap();
        repo.create("entry", "e1", RelType::EvidenceOf, "entry", "e2", MetaValue::empty_map()).unwrap();
        repo.create("entry", "e2", RelType::EvidenceOf, "entry", "e1", MetaValue::empty_map()).unwrap();
        repo.create("entry", "e2", RelType::EvidenceOf, "entry", "e3", MetaValue::empty_map()).unwrap();

        let related = repo.find_related_entries("e1").unwrap();
        assert_eq!(related, vec!["e3".to_string()]);
    }

    #[test]
    fn replace_edges_swaps_full_set() {
        let repo = EdgeRepo::open_in_memory().unwrap();
        repo.create("entry", "e1", RelType::Cites, "entry", "old", MetaValue::empty_map()).unwrap();
        repo.replace_edges(
            "e1",
            RelType::Cites,
            &[("entry".to_string(), "new-a".to_string(), MetaValue::empty_map()), ("entry".to_string(), "new-b".to_string(), MetaValue::empty_map())],
        )
        .unwrap();

        let edges = repo.find_by_src("e1").unwrap();
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.dst_id != "old"));
    }
}
