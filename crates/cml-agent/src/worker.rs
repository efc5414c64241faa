//! `cml worker run` (spec.md §5): one long-lived background process driving
//! the C3 outbox/vector worker and the C5 consolidation worker. Mirrors the
//! teacher's `vestige-mcp` startup pattern of spawning a periodic
//! `tokio::spawn` task alongside the main process rather than requiring a
//! separate daemon binary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cml_core::config::MemoryConfig;
use cml_core::consolidation::should_trigger;
use cml_core::MemoryService;

/// Runs until killed (SIGINT/SIGTERM via the process manager); exit code is
/// only meaningful for the startup-failure path.
pub async fn run() -> i32 {
    let config = MemoryConfig::from_env();
    let project_id = std::env::var("CML_PROJECT_ID").unwrap_or_else(|_| "worker".to_string());
    let project_env = std::env::var("CML_PROJECT_ENV").unwrap_or_else(|_| "production".to_string());

    let service = match MemoryService::new(config.clone(), project_id, project_env) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("cml worker run: failed to open store: {e}");
            return 1;
        }
    };

    tracing::info!(db_path = %config.db_path.display(), "worker daemon starting");

    let outbox_service = service.clone();
    let outbox_task = tokio::spawn(async move { outbox_service.outbox_worker().run().await });

    let consolidation_service = service.clone();
    let consolidation_task = tokio::spawn(async move { consolidation_loop(consolidation_service).await });

    let _ = tokio::join!(outbox_task, consolidation_task);
    0
}

/// Polls `should_trigger` on a short tick (a fraction of the configured
/// consolidation interval, never faster than the outbox poll) and runs one
/// consolidation pass whenever it fires.
async fn consolidation_loop(service: Arc<MemoryService>) {
    let config = service.config().clone();
    let tick_ms = (config.trigger_interval_ms / 10).clamp(config.outbox_poll_interval_ms, config.trigger_interval_ms.max(1));
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));

    let mut last_run = Instant::now();
    let mut last_len = service.working_set_len();
    let mut last_change = Instant::now();

    loop {
        ticker.tick().await;

        let len = service.working_set_len();
        if len != last_len {
            last_len = len;
            last_change = Instant::now();
        }

        let fires = should_trigger(len, last_run.elapsed().as_millis() as u64, last_change.elapsed().as_millis() as u64, &config);
        if !fires {
            continue;
        }

        match service.run_consolidation() {
            Ok(report) => {
                tracing::debug!(?report, "consolidation pass complete");
                last_run = Instant::now();
            }
            Err(e) => tracing::warn!(error = %e, "consolidation pass failed"),
        }
    }
}
