//! Operational scripts (spec.md §6): backlog inspection and repair, plus the
//! C10 replication pull. Scripts exit 0 on ok/skip, non-zero on fatal I/O
//! errors.

use std::path::Path;

use cml_core::{MemoryConfig, MemoryService};
use serde_json::json;

fn service() -> anyhow::Result<MemoryService> {
    let config = MemoryConfig::from_env();
    Ok(MemoryService::new(config, "ops", "dev")?)
}

pub fn report_sync_gap() -> i32 {
    match run_report_sync_gap() {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => {
            eprintln!("report-sync-gap failed: {err}");
            1
        }
    }
}

fn run_report_sync_gap() -> anyhow::Result<String> {
    let svc = service()?;
    let report = svc.report_sync_gap()?;
    let total_events = svc.events().total_events()?;
    Ok(json!({
        "totalEvents": total_events,
        "inEventsNotLeveledCount": report.missing_levels,
        "outboxPendingCount": report.outbox_pending,
        "outboxFailedCount": report.outbox_failed,
    })
    .to_string())
}

pub fn fix_sync_gap() -> i32 {
    match run_fix_sync_gap() {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => {
            eprintln!("fix-sync-gap failed: {err}");
            1
        }
    }
}

fn run_fix_sync_gap() -> anyhow::Result<String> {
    let svc = service()?;
    let fix = svc.fix_sync_gap()?;
    Ok(json!({
        "leveledInserted": fix.inserted_levels,
        "recoveredProcessingOutbox": fix.recovered_outbox_rows,
    })
    .to_string())
}

pub fn replicate_pull(peer_db_path: &Path, cursor: i64, limit: usize) -> i32 {
    match run_replicate_pull(peer_db_path, cursor, limit) {
        Ok(output) => {
            println!("{output}");
            0
        }
        Err(err) => {
            eprintln!("replicate pull failed: {err}");
            1
        }
    }
}

fn run_replicate_pull(peer_db_path: &Path, cursor: i64, limit: usize) -> anyhow::Result<String> {
    let svc = service()?;
    let report = svc.replicate_pull(peer_db_path, cursor, limit)?;
    Ok(json!({
        "inserted": report.inserted,
        "skipped": report.skipped,
        "nextCursor": report.next_cursor,
    })
    .to_string())
}
