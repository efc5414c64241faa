//! Versioned schema migrations, applied in order and tracked in
//! `schema_version`. Shape adapted directly from the teacher's
//! `storage::migrations` module: a `&'static [Migration]` table of plain SQL
//! strings, each idempotent via `CREATE TABLE IF NOT EXISTS`.

use rusqlite::Connection;

use crate::error::{MemoryError, Result};

pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

pub static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "events, memory_levels, dedupe_index",
        up: r#"
            CREATE TABLE IF NOT EXISTS events (
                rowid           INTEGER PRIMARY KEY AUTOINCREMENT,
                id              TEXT NOT NULL UNIQUE,
                event_type      TEXT NOT NULL,
                session_id      TEXT NOT NULL,
                turn_id         TEXT,
                timestamp       TEXT NOT NULL,
                content         TEXT NOT NULL,
                canonical_key   TEXT NOT NULL,
                dedupe_key      TEXT NOT NULL,
                metadata        TEXT NOT NULL DEFAULT '{}'
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_events_dedupe_key ON events(dedupe_key);
            CREATE INDEX IF NOT EXISTS idx_events_session_id ON events(session_id);
            CREATE INDEX IF NOT EXISTS idx_events_turn_id ON events(turn_id);
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);

            CREATE TABLE IF NOT EXISTS memory_levels (
                event_id        TEXT PRIMARY KEY REFERENCES events(id),
                level           TEXT NOT NULL DEFAULT 'L0',
                promoted_at     TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_memory_levels_level ON memory_levels(level);
        "#,
    },
    Migration {
        version: 2,
        description: "embedding_outbox",
        up: r#"
            CREATE TABLE IF NOT EXISTS embedding_outbox (
                id              INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id        TEXT NOT NULL REFERENCES events(id),
                content         TEXT NOT NULL,
                status          TEXT NOT NULL DEFAULT 'pending',
                attempt_count   INTEGER NOT NULL DEFAULT 0,
                last_error      TEXT,
                created_at      TEXT NOT NULL,
                updated_at      TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_outbox_status ON embedding_outbox(status);
            CREATE INDEX IF NOT EXISTS idx_outbox_event_id ON embedding_outbox(event_id);
        "#,
    },
    Migration {
        version: 3,
        description: "events_fts (FTS5 external content) and sync triggers",
        up: r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS events_fts USING fts5(
                content,
                content='events',
                content_rowid='rowid',
                tokenize='porter ascii'
            );

            CREATE TRIGGER IF NOT EXISTS events_ai AFTER INSERT ON events BEGIN
                INSERT INTO events_fts(rowid, content) VALUES (new.rowid, new.content);
            END;
            CREATE TRIGGER IF NOT EXISTS events_ad AFTER DELETE ON events BEGIN
                INSERT INTO events_fts(events_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
            END;
            CREATE TRIGGER IF NOT EXISTS events_au AFTER UPDATE ON events BEGIN
                INSERT INTO events_fts(events_fts, rowid, content) VALUES ('delete', old.rowid, old.content);
                INSERT INTO events_fts(rowid, content) VALUES (new.rowid, new.content);
            END;
        "#,
    },
    Migration {
        version: 4,
        description: "edges",
        up: r#"
            CREATE TABLE IF NOT EXISTS edges (
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
            CREATE INDEX IF NOT EXISTS idx_edges_dst ON edges(dst_id);
        "#,
    },
    Migration {
        version: 5,
        description: "consolidated_memories, rules",
        up: r#"
            CREATE TABLE IF NOT EXISTS consolidated_memories (
                memory_id           TEXT PRIMARY KEY,
                summary              TEXT NOT NULL,
                topics                TEXT NOT NULL DEFAULT '[]',
                source_event_ids      TEXT NOT NULL DEFAULT '[]',
                source_ids_hash       TEXT NOT NULL,
                confidence            REAL NOT NULL,
                created_at            TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_consolidated_source_hash
                ON consolidated_memories(source_ids_hash);

            CREATE TABLE IF NOT EXISTS rules (
                rule_id               TEXT PRIMARY KEY,
                text                  TEXT NOT NULL,
                source_memory_ids     TEXT NOT NULL DEFAULT '[]',
                confidence            REAL NOT NULL,
                source_memory_id      TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_rules_source_memory
                ON rules(source_memory_id);
        "#,
    },
    Migration {
        version: 6,
        description: "shared_troubleshooting",
        up: r#"
            CREATE TABLE IF NOT EXISTS shared_troubleshooting (
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
            );
        "#,
    },
    Migration {
        version: 7,
        description: "continuity_log",
        up: r#"
            CREATE TABLE IF NOT EXISTS continuity_log (
                log_id                TEXT PRIMARY KEY,
                from_context_id       TEXT NOT NULL,
                to_context_id         TEXT NOT NULL,
                score                 REAL NOT NULL,
                transition_type       TEXT NOT NULL,
                created_at            TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 8,
        description: "node_embeddings (durable vector store mirror)",
        up: r#"
            CREATE TABLE IF NOT EXISTS node_embeddings (
                event_id              TEXT PRIMARY KEY REFERENCES events(id),
                session_id            TEXT NOT NULL,
                event_type            TEXT NOT NULL,
                content               TEXT NOT NULL,
                vector                BLOB NOT NULL,
                timestamp             TEXT NOT NULL,
                metadata              TEXT NOT NULL DEFAULT '{}'
            );
        "#,
    },
];

pub fn get_current_version(conn: &Connection) -> Result<u32> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;
    let version: Option<u32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .unwrap_or(None);
    Ok(version.unwrap_or(0))
}

pub fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let current = get_current_version(conn)?;
    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        let tx = conn.transaction()?;
        tx.execute_batch(migration.up).map_err(|e| {
            MemoryError::Fatal(format!(
                "migration {} ({}) failed: {e}",
                migration.version, migration.description
            ))
        })?;
        tx.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )?;
        tx.commit()?;
        tracing::debug!(version = migration.version, description = migration.description, "applied migration");
    }
    Ok(())
}
