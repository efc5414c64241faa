//! Error taxonomy for the memory engine
//!
//! Mirrors the teacher's one-error-enum-per-component shape (see
//! `StorageError` in the original `storage::sqlite`), composed here into a
//! single `MemoryError` at the service facade per spec §7.

/// Top-level result type used across the crate.
pub type Result<T> = std::result::Result<T, MemoryError>;

/// The error taxonomy from spec §7.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Bad input: unknown event type, empty session, oversize content.
    #[error("validation error: {0}")]
    Validation(String),

    /// Database busy / filesystem contention. Retried with backoff inside
    /// the writer; surfaced only if persistent.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// Embedder unavailable or returned the wrong dimension.
    #[error("embedder error: {0}")]
    Embedder(String),

    /// Vector store write failure. Never poisons the event store.
    #[error("vector store error: {0}")]
    VectorStore(String),

    /// Corruption or schema drift. Callers should abort, not auto-repair.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Requested id/entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying SQLite error, classified by `classify_sqlite_error`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MemoryError {
    /// `true` for the events the ingest hook can safely swallow: the event
    /// log has already committed, so a failure past that point is
    /// recoverable offline per spec §7's "lossless for committed events".
    pub fn is_recoverable_offline(&self) -> bool {
        matches!(
            self,
            MemoryError::Embedder(_) | MemoryError::VectorStore(_) | MemoryError::TransientIo(_)
        )
    }
}

/// Classify a raw `rusqlite::Error` as busy/locked (transient) vs. other.
pub fn is_busy_error(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            )
    )
}
