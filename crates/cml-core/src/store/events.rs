//! Event Store (C1): durable append-only event log with dedupe, metadata,
//! turn grouping, and outbox enqueue. Adapted from the teacher's `Storage`
//! (separate `writer`/`reader` `Mutex<Connection>` fields, WAL mode, same
//! PRAGMA set) but re-pointed at this spec's schema.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::config::MemoryConfig;
use crate::error::{is_busy_error, MemoryError, Result};
use crate::memory::{Event, EventType, MemoryLevel, OutboxItem, OutboxStatus};
use crate::metadata::MetaValue;
use crate::outbox::OutboxSource;
use crate::search::sanitize_fts5_query;

use super::migrations::apply_migrations;

/// `append`/`import_events` result, spec.md §4.1.
#[derive(Debug, Clone)]
pub struct AppendOutcome {
    pub id: String,
    pub success: bool,
    pub is_duplicate: bool,
}

pub struct EventStore {
    writer: std::sync::Mutex<Connection>,
    reader: std::sync::Mutex<Connection>,
    max_content_bytes: usize,
    dedupe_bucket_secs: i64,
}

fn configure_connection(conn: &Connection, busy_timeout_ms: u32) -> Result<()> {
    conn.execute_batch(&format!(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;
         PRAGMA cache_size=-64000;
         PRAGMA temp_store=MEMORY;
         PRAGMA foreign_keys=ON;
         PRAGMA busy_timeout={busy_timeout_ms};
         PRAGMA mmap_size=268435456;"
    ))?;
    Ok(())
}

impl EventStore {
    pub fn open(config: &MemoryConfig) -> Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut writer = Connection::open(&config.db_path)?;
        configure_connection(&writer, config.busy_timeout_ms)?;
        apply_migrations(&mut writer)?;

        let reader = Connection::open(&config.db_path)?;
        configure_connection(&reader, config.busy_timeout_ms)?;

        Ok(Self {
            writer: std::sync::Mutex::new(writer),
            reader: std::sync::Mutex::new(reader),
            max_content_bytes: config.max_content_bytes,
            dedupe_bucket_secs: config.dedupe_bucket_secs,
        })
    }

    /// A shared-cache, named in-memory database: `writer` and `reader` are
    /// two connections onto the *same* backing store, so reads exercise the
    /// same `self.reader` path as a real file-backed `open()` instead of
    /// silently reading an empty database.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let uri = format!("file:cml-core-event-store-{}?mode=memory&cache=shared", COUNTER.fetch_add(1, Ordering::Relaxed));
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_SHARED_CACHE;

        let mut writer = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&writer, 5000)?;
        apply_migrations(&mut writer)?;

        let reader = Connection::open_with_flags(&uri, flags)?;
        configure_connection(&reader, 5000)?;

        Ok(Self {
            writer: std::sync::Mutex::new(writer),
            reader: std::sync::Mutex::new(reader),
            max_content_bytes: 1_000_000,
            dedupe_bucket_secs: 60,
        })
    }

    fn canonical_key(event_type: &str, session_id: &str, content: &str) -> String {
        let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        let mut hasher = Sha256::new();
        hasher.update(event_type.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(session_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(normalized.as_bytes());
        hex(&hasher.finalize())
    }

    fn dedupe_key(canonical_key: &str, timestamp: DateTime<Utc>, bucket_secs: i64) -> String {
        let bucket = timestamp.timestamp().div_euclid(bucket_secs.max(1));
        let mut hasher = Sha256::new();
        hasher.update(canonical_key.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(bucket.to_string().as_bytes());
        hex(&hasher.finalize())
    }

    /// spec.md §4.1: insert event -> insert `L0` memory-level row -> insert
    /// outbox row -> commit, all in one transaction. Duplicate `dedupe_key`
    /// returns the original id without writing a new row (E2).
    pub fn append(
        &self,
        event_type: &str,
        session_id: &str,
        turn_id: Option<&str>,
        timestamp: Option<DateTime<Utc>>,
        content: &str,
        metadata: MetaValue,
    ) -> Result<AppendOutcome> {
        let parsed_type = EventType::parse(event_type)
            .ok_or_else(|| MemoryError::Validation(format!("unknown event_type '{event_type}'")))?;
        if session_id.trim().is_empty() {
            return Err(MemoryError::Validation("session_id must not be empty".into()));
        }
        if content.len() > self.max_content_bytes {
            return Err(MemoryError::Validation(format!(
                "content exceeds max_content_bytes ({} > {})",
                content.len(),
                self.max_content_bytes
            )));
        }

        let timestamp = timestamp.unwrap_or_else(Utc::now);
        if timestamp > Utc::now() + chrono::Duration::hours(1) {
            return Err(MemoryError::Validation("timestamp is skewed more than 1h into the future".into()));
        }

        let canonical_key = Self::canonical_key(event_type, session_id, content);
        let dedupe_key = Self::dedupe_key(&canonical_key, timestamp, self.dedupe_bucket_secs);

        let mut writer = self.writer.lock().expect("event store writer poisoned");
        if let Some(existing_id) = query_id_by_dedupe_key(&writer, &dedupe_key)? {
            return Ok(AppendOutcome { id: existing_id, success: true, is_duplicate: true });
        }

        let id = uuid::Uuid::new_v4().to_string();
        let tx = with_busy_retry(|| writer.transaction())?;
        tx.execute(
            "INSERT INTO events (id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![id, parsed_type.as_str(), session_id, turn_id, timestamp.to_rfc3339(), content, canonical_key, dedupe_key, metadata.to_json_string()],
        )?;
        tx.execute(
            "INSERT INTO memory_levels (event_id, level) VALUES (?1, 'L0')",
            params![id],
        )?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO embedding_outbox (event_id, content, status, attempt_count, created_at, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
            params![id, content, now],
        )?;
        tx.commit()?;

        Ok(AppendOutcome { id, success: true, is_duplicate: false })
    }

    pub fn get(&self, id: &str) -> Result<Option<Event>> {
        let reader = self.reader.lock().expect("event store reader poisoned");
        reader
            .query_row("SELECT rowid, id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata FROM events WHERE id = ?1", params![id], row_to_event)
            .optional()
            .map_err(MemoryError::from)
    }

    pub fn get_session_events(&self, session_id: &str) -> Result<Vec<Event>> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        let mut stmt = conn.prepare(
            "SELECT rowid, id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata
             FROM events WHERE session_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![session_id], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MemoryError::from)
    }

    pub fn get_recent(&self, limit: usize) -> Result<Vec<Event>> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        let mut stmt = conn.prepare(
            "SELECT rowid, id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata
             FROM events ORDER BY rowid DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MemoryError::from)
    }

    pub fn get_events_by_level(&self, level: MemoryLevel, limit: usize, offset: usize) -> Result<Vec<Event>> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        let mut stmt = conn.prepare(
            "SELECT e.rowid, e.id, e.event_type, e.session_id, e.turn_id, e.timestamp, e.content, e.canonical_key, e.dedupe_key, e.metadata
             FROM events e JOIN memory_levels m ON m.event_id = e.id
             WHERE m.level = ?1 ORDER BY e.rowid DESC LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![level.as_str(), limit as i64, offset as i64], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MemoryError::from)
    }

    pub fn get_events_by_turn(&self, turn_id: &str) -> Result<Vec<Event>> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        let mut stmt = conn.prepare(
            "SELECT rowid, id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata
             FROM events WHERE turn_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map(params![turn_id], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MemoryError::from)
    }

    /// Sanitizes `query` (see `search::sanitize_fts5_query`) then ranks by
    /// FTS5 `rank` (bm25-derived), ties broken by recency.
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<Event>> {
        let Some(sanitized) = sanitize_fts5_query(query) else {
            return Ok(vec![]);
        };

        let conn = self.reader.lock().expect("event store reader poisoned");
        let mut stmt = conn.prepare(
            "SELECT e.rowid, e.id, e.event_type, e.session_id, e.turn_id, e.timestamp, e.content, e.canonical_key, e.dedupe_key, e.metadata
             FROM events_fts f JOIN events e ON e.rowid = f.rowid
             WHERE events_fts MATCH ?1
             ORDER BY rank, e.timestamp DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![sanitized, limit as i64], row_to_event)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MemoryError::from)
    }

    pub fn get_events_since_rowid(&self, cursor: i64, limit: usize) -> Result<Vec<(i64, Event)>> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        let mut stmt = conn.prepare(
            "SELECT rowid, id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata
             FROM events WHERE rowid > ?1 ORDER BY rowid ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![cursor, limit as i64], |row| {
            let event = row_to_event(row)?;
            Ok((event.rowid.unwrap_or_default(), event))
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MemoryError::from)
    }

    /// Idempotent by `(id)` and `(dedupe_key)`: preserves the source `id`.
    pub fn import_events(&self, events: &[Event]) -> Result<(usize, usize)> {
        let mut inserted = 0usize;
        let mut skipped = 0usize;
        let mut writer = self.writer.lock().expect("event store writer poisoned");

        for event in events {
            let tx = with_busy_retry(|| writer.transaction())?;
            let already_by_id: Option<String> =
                tx.query_row("SELECT id FROM events WHERE id = ?1", params![event.id], |r| r.get(0)).optional()?;
            let already_by_dedupe: Option<String> = tx
                .query_row("SELECT id FROM events WHERE dedupe_key = ?1", params![event.dedupe_key], |r| r.get(0))
                .optional()?;

            if already_by_id.is_some() || already_by_dedupe.is_some() {
                skipped += 1;
                tx.commit()?;
                continue;
            }

            tx.execute(
                "INSERT INTO events (id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    event.id,
                    event.event_type.as_str(),
                    event.session_id,
                    event.turn_id,
                    event.timestamp.to_rfc3339(),
                    event.content,
                    event.canonical_key,
                    event.dedupe_key,
                    event.metadata.to_json_string(),
                ],
            )?;
            tx.execute("INSERT INTO memory_levels (event_id, level) VALUES (?1, 'L0')", params![event.id])?;
            let now = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO embedding_outbox (event_id, content, status, attempt_count, created_at, updated_at)
                 VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
                params![event.id, event.content, now],
            )?;
            tx.commit()?;
            inserted += 1;
        }

        Ok((inserted, skipped))
    }

    /// Derives missing `turn_id` by grouping consecutive events in a session
    /// between a `user_prompt` and its `agent_response`, a lexical heuristic
    /// (no NLU) matching spec.md §4.1.
    pub fn backfill_turn_ids(&self) -> Result<usize> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        let mut stmt = conn.prepare(
            "SELECT rowid, id, event_type, session_id, turn_id, timestamp, content, canonical_key, dedupe_key, metadata
             FROM events WHERE turn_id IS NULL ORDER BY rowid ASC",
        )?;
        let rows = stmt.query_map([], row_to_event)?.collect::<rusqlite::Result<Vec<_>>>()?;
        drop(stmt);

        let mut updated = 0usize;
        let mut current_turn: Option<String> = None;
        for event in rows {
            match event.event_type {
                EventType::UserPrompt => {
                    current_turn = Some(uuid::Uuid::new_v4().to_string());
                }
                _ => {}
            }
            if let Some(turn_id) = &current_turn {
                conn.execute("UPDATE events SET turn_id = ?1 WHERE id = ?2", params![turn_id, event.id])?;
                updated += 1;
            }
            if event.event_type == EventType::AgentResponse {
                current_turn = None;
            }
        }
        Ok(updated)
    }

    /// Best-effort retrieval side effect (spec.md §4.7): bump `access_count`
    /// and refresh `last_accessed_at`.
    pub fn touch_access(&self, id: &str) {
        let conn = self.writer.lock().expect("event store writer poisoned");
        let result = conn.query_row("SELECT metadata FROM events WHERE id = ?1", params![id], |r| r.get::<_, String>(0));
        let Ok(metadata_str) = result else { return };
        let Ok(mut metadata) = MetaValue::from_json_str(&metadata_str) else { return };

        let count = metadata
            .get_path("access_count")
            .and_then(|v| v.as_scalar())
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        metadata.set_path("access_count", MetaValue::scalar(count + 1));
        metadata.set_path("last_accessed_at", MetaValue::scalar(Utc::now().to_rfc3339()));

        if let Err(e) = conn.execute("UPDATE events SET metadata = ?1 WHERE id = ?2", params![metadata.to_json_string(), id]) {
            tracing::warn!(error = %e, event_id = id, "failed to persist access-count touch");
        }
    }

    /// Promote an event to a new memory level (C5 consolidation).
    pub fn set_level(&self, event_id: &str, level: MemoryLevel) -> Result<()> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        conn.execute(
            "INSERT INTO memory_levels (event_id, level, promoted_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(event_id) DO UPDATE SET level = excluded.level, promoted_at = excluded.promoted_at",
            params![event_id, level.as_str(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// `fix-sync-gap` support: events with no `memory_levels` row.
    pub fn insert_missing_levels(&self) -> Result<usize> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        let count = conn.execute(
            "INSERT INTO memory_levels (event_id, level)
             SELECT e.id, 'L0' FROM events e LEFT JOIN memory_levels m ON m.event_id = e.id
             WHERE m.event_id IS NULL",
            [],
        )?;
        Ok(count)
    }

    pub fn total_events(&self) -> Result<u64> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(MemoryError::from)
    }

    pub fn un_leveled_count(&self) -> Result<u64> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        conn.query_row(
            "SELECT COUNT(*) FROM events e LEFT JOIN memory_levels m ON m.event_id = e.id WHERE m.event_id IS NULL",
            [],
            |r| r.get::<_, i64>(0),
        )
        .map(|n| n as u64)
        .map_err(MemoryError::from)
    }

    pub fn outbox_counts(&self) -> Result<(u64, u64)> {
        let conn = self.reader.lock().expect("event store reader poisoned");
        let pending: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_outbox WHERE status = 'pending'", [], |r| r.get(0))?;
        let failed: i64 = conn.query_row("SELECT COUNT(*) FROM embedding_outbox WHERE status = 'failed'", [], |r| r.get(0))?;
        Ok((pending as u64, failed as u64))
    }
}

impl OutboxSource for EventStore {
    fn claim_batch(&self, batch_size: usize) -> Result<Vec<OutboxItem>> {
        let mut conn = self.writer.lock().expect("event store writer poisoned");
        let tx = with_busy_retry(|| conn.transaction())?;

        let ids: Vec<i64> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM embedding_outbox WHERE status = 'pending' ORDER BY id ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![batch_size as i64], |r| r.get::<_, i64>(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let now = Utc::now().to_rfc3339();
        let mut items = Vec::with_capacity(ids.len());
        for id in &ids {
            tx.execute(
                "UPDATE embedding_outbox SET status = 'processing', updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            let item = tx.query_row(
                "SELECT id, event_id, content, status, attempt_count, last_error, created_at, updated_at
                 FROM embedding_outbox WHERE id = ?1",
                params![id],
                row_to_outbox_item,
            )?;
            items.push(item);
        }
        tx.commit()?;
        Ok(items)
    }

    fn complete(&self, outbox_id: i64) -> Result<()> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        conn.execute(
            "UPDATE embedding_outbox SET status = 'done', updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), outbox_id],
        )?;
        Ok(())
    }

    fn fail(&self, outbox_id: i64, reason: &str) -> Result<()> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        conn.execute(
            "UPDATE embedding_outbox SET status = 'failed', attempt_count = attempt_count + 1, last_error = ?1, updated_at = ?2 WHERE id = ?3",
            params![reason, Utc::now().to_rfc3339(), outbox_id],
        )?;
        Ok(())
    }

    fn get_event(&self, event_id: &str) -> Result<Option<Event>> {
        self.get(event_id)
    }

    fn recover_stale(&self, stale_after_secs: i64) -> Result<usize> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        let cutoff = (Utc::now() - chrono::Duration::seconds(stale_after_secs)).to_rfc3339();
        let n = conn.execute(
            "UPDATE embedding_outbox SET status = 'pending', updated_at = ?1 WHERE status = 'processing' AND updated_at < ?2",
            params![Utc::now().to_rfc3339(), cutoff],
        )?;
        Ok(n)
    }

    fn retry_failed(&self, max_retries: u32) -> Result<usize> {
        let conn = self.writer.lock().expect("event store writer poisoned");
        let n = conn.execute(
            "UPDATE embedding_outbox SET status = 'pending', updated_at = ?1 WHERE status = 'failed' AND attempt_count < ?2",
            params![Utc::now().to_rfc3339(), max_retries],
        )?;
        Ok(n)
    }
}

fn query_id_by_dedupe_key(conn: &Connection, dedupe_key: &str) -> Result<Option<String>> {
    conn.query_row("SELECT id FROM events WHERE dedupe_key = ?1", params![dedupe_key], |r| r.get(0))
        .optional()
        .map_err(MemoryError::from)
}

fn row_to_event(row: &Row) -> rusqlite::Result<Event> {
    let event_type_str: String = row.get(2)?;
    let timestamp_str: String = row.get(5)?;
    let metadata_str: String = row.get(9)?;

    Ok(Event {
        rowid: Some(row.get::<_, i64>(0)?),
        id: row.get(1)?,
        event_type: EventType::parse(&event_type_str).unwrap_or(EventType::UserPrompt),
        session_id: row.get(3)?,
        turn_id: row.get(4)?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp_str).map(|dt| dt.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        content: row.get(6)?,
        canonical_key: row.get(7)?,
        dedupe_key: row.get(8)?,
        metadata: MetaValue::from_json_str(&metadata_str).unwrap_or_default(),
    })
}

fn row_to_outbox_item(row: &Row) -> rusqlite::Result<OutboxItem> {
    let status_str: String = row.get(3)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;
    Ok(OutboxItem {
        id: row.get(0)?,
        event_id: row.get(1)?,
        content: row.get(2)?,
        status: OutboxStatus::parse(&status_str).unwrap_or(OutboxStatus::Pending),
        attempt_count: row.get(4)?,
        last_error: row.get(5)?,
        created_at: DateTime::parse_from_rfc3339(&created_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_str).map(|d| d.with_timezone(&Utc)).unwrap_or_else(|_| Utc::now()),
    })
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// `spec.md` §7 `TransientIOError`: retry on SQLITE_BUSY/LOCKED with a short
/// bounded backoff rather than surfacing immediately.
fn with_busy_retry<'a, T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_error(&e) && attempt < 5 => {
                attempt += 1;
                std::thread::sleep(std::time::Duration::from_millis(20 * attempt));
            }
            Err(e) => return Err(MemoryError::from(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> EventStore {
        EventStore::open_in_memory().unwrap()
    }

    #[test]
    fn append_then_get_round_trips() {
        let s = store();
        let outcome = s.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
        assert!(outcome.success);
        assert!(!outcome.is_duplicate);

        let event = s.get(&outcome.id).unwrap().unwrap();
        assert_eq!(event.content, "hello");
        assert_eq!(event.rowid, Some(1));
    }

    #[test]
    fn duplicate_within_bucket_returns_same_id() {
        let s = store();
        let t = Utc::now();
        let first = s.append("user_prompt", "s1", None, Some(t), "hello", MetaValue::empty_map()).unwrap();
        let second = s.append("user_prompt", "s1", None, Some(t), "hello", MetaValue::empty_map()).unwrap();

        assert!(!first.is_duplicate);
        assert!(second.is_duplicate);
        assert_eq!(first.id, second.id);
        assert_eq!(s.total_events().unwrap(), 1);
    }

    #[test]
    fn unknown_event_type_is_validation_error() {
        let s = store();
        let result = s.append("not_a_type", "s1", None, None, "x", MetaValue::empty_map());
        assert!(matches!(result, Err(MemoryError::Validation(_))));
    }

    #[test]
    fn empty_session_id_is_validation_error() {
        let s = store();
        let result = s.append("user_prompt", "", None, None, "x", MetaValue::empty_map());
        assert!(matches!(result, Err(MemoryError::Validation(_))));
    }

    #[test]
    fn append_creates_level_and_outbox_row() {
        let s = store();
        let outcome = s.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
        let (pending, _failed) = s.outbox_counts().unwrap();
        assert_eq!(pending, 1);

        let levels = s.get_events_by_level(MemoryLevel::L0, 10, 0).unwrap();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].id, outcome.id);
    }

    #[test]
    fn rowids_are_monotone() {
        let s = store();
        let a = s.append("user_prompt", "s1", None, None, "one", MetaValue::empty_map()).unwrap();
        let b = s.append("user_prompt", "s1", None, None, "two", MetaValue::empty_map()).unwrap();
        let ea = s.get(&a.id).unwrap().unwrap();
        let eb = s.get(&b.id).unwrap().unwrap();
        assert!(ea.rowid.unwrap() < eb.rowid.unwrap());
    }

    #[test]
    fn keyword_search_finds_matching_event() {
        let s = store();
        s.append("user_prompt", "s1", None, None, "fix deployment issue with nginx", MetaValue::empty_map()).unwrap();
        s.append("user_prompt", "s1", None, None, "random unrelated text", MetaValue::empty_map()).unwrap();

        let results = s.keyword_search("deployment", 5).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].content.contains("deployment"));
    }

    #[test]
    fn import_events_is_idempotent() {
        let s = store();
        let event = Event {
            id: "ext-1".to_string(),
            event_type: EventType::UserPrompt,
            session_id: "s1".to_string(),
            turn_id: None,
            timestamp: Utc::now(),
            content: "hello".to_string(),
            canonical_key: "c1".to_string(),
            dedupe_key: "d1".to_string(),
            metadata: MetaValue::empty_map(),
            rowid: None,
        };

        let (inserted, skipped) = s.import_events(std::slice::from_ref(&event)).unwrap();
        assert_eq!((inserted, skipped), (1, 0));

        let (inserted2, skipped2) = s.import_events(std::slice::from_ref(&event)).unwrap();
        assert_eq!((inserted2, skipped2), (0, 1));

        let fetched = s.get("ext-1").unwrap().unwrap();
        assert_eq!(fetched.content, "hello");
    }

    #[test]
    fn get_events_since_rowid_is_strictly_increasing() {
        let s = store();
        s.append("user_prompt", "s1", None, None, "a", MetaValue::empty_map()).unwrap();
        s.append("user_prompt", "s1", None, None, "b", MetaValue::empty_map()).unwrap();
        s.append("user_prompt", "s1", None, None, "c", MetaValue::empty_map()).unwrap();

        let page = s.get_events_since_rowid(0, 10).unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn touch_access_increments_counter() {
        let s = store();
        let outcome = s.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
        s.touch_access(&outcome.id);
        s.touch_access(&outcome.id);
        let event = s.get(&outcome.id).unwrap().unwrap();
        assert_eq!(event.access_count(), 2);
    }

    #[test]
    fn outbox_source_claim_complete_fail_cycle() {
        let s = store();
        let outcome = s.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();

        let claimed = s.claim_batch(10).unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].event_id, outcome.id);

        s.complete(claimed[0].id).unwrap();
        let (pending, _failed) = s.outbox_counts().unwrap();
        assert_eq!(pending, 0);
    }

    #[test]
    fn stale_processing_rows_are_recovered() {
        let s = store();
        s.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
        let claimed = s.claim_batch(10).unwrap();
        assert_eq!(claimed.len(), 1);

        let recovered = s.recover_stale(-1).unwrap();
        assert_eq!(recovered, 1);
        let (pending, _) = s.outbox_counts().unwrap();
        assert_eq!(pending, 1);
    }
}
