//! Replication Feed (C10): a thin pull-cursor wrapper over C1's
//! `get_events_since_rowid` + `import_events` (spec.md §4.10, §8 S5).
//! Not a daemon: one `pull` call drives one round.

use std::path::Path;

use crate::config::MemoryConfig;
use crate::error::Result;
use crate::store::EventStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullReport {
    pub inserted: usize,
    pub skipped: usize,
    pub next_cursor: i64,
}

/// One pull round: read `limit` events from `source` after `cursor`, import
/// them into `target`. Idempotent by `(id)`/`(dedupe_key)` — re-running the
/// same round is a no-op on the second call.
pub fn pull_once(source: &EventStore, target: &EventStore, cursor: i64, limit: usize) -> Result<PullReport> {
    let batch = source.get_events_since_rowid(cursor, limit)?;
    if batch.is_empty() {
        return Ok(PullReport { inserted: 0, skipped: 0, next_cursor: cursor });
    }

    let next_cursor = batch.iter().map(|(rowid, _)| *rowid).max().unwrap_or(cursor);
    let events: Vec<_> = batch.into_iter().map(|(_, event)| event).collect();
    let (inserted, skipped) = target.import_events(&events)?;

    Ok(PullReport { inserted, skipped, next_cursor })
}

/// Opens the peer's database read-only-in-spirit (only `get_events_since_rowid`
/// is called on it) and pulls one round into `target`, returning the report
/// plus the cursor the caller should persist for the next invocation.
pub fn pull_from_path(peer_db_path: &Path, target: &EventStore, cursor: i64, limit: usize) -> Result<PullReport> {
    let mut config = MemoryConfig::default();
    config.db_path = peer_db_path.to_path_buf();
    let peer = EventStore::open(&config)?;
    pull_once(&peer, target, cursor, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetaValue;

    #[test]
    fn pull_imports_new_events_and_advances_cursor() {
        let source = EventStore::open_in_memory().unwrap();
        let target = EventStore::open_in_memory().unwrap();

        source.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();
        source.append("agent_response", "s1", None, None, "hi there", MetaValue::empty_map()).unwrap();

        let report = pull_once(&source, &target, 0, 10).unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.skipped, 0);
        assert!(report.next_cursor > 0);
        assert_eq!(target.total_events().unwrap(), 2);
    }

    #[test]
    fn repeated_pull_with_same_cursor_is_idempotent() {
        let source = EventStore::open_in_memory().unwrap();
        let target = EventStore::open_in_memory().unwrap();
        source.append("user_prompt", "s1", None, None, "hello", MetaValue::empty_map()).unwrap();

        let first = pull_once(&source, &target, 0, 10).unwrap();
        assert_eq!(first.inserted, 1);

        let second = pull_once(&source, &target, 0, 10).unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.skipped, 1);
    }

    #[test]
    fn empty_source_range_reports_zero() {
        let source = EventStore::open_in_memory().unwrap();
        let target = EventStore::open_in_memory().unwrap();
        let report = pull_once(&source, &target, 0, 10).unwrap();
        assert_eq!(report, PullReport { inserted: 0, skipped: 0, next_cursor: 0 });
    }
}
