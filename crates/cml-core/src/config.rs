//! Runtime tunables, read from `CML_*` environment variables.
//!
//! Mirrors the teacher's pattern of direct `std::env::var` reads for things
//! like `FASTEMBED_CACHE_PATH` rather than a config-file format.

use std::path::PathBuf;

use directories::ProjectDirs;

/// All tunables for a `MemoryService` instance.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Path to the primary SQLite database file.
    pub db_path: PathBuf,
    /// `busy_timeout` PRAGMA, milliseconds.
    pub busy_timeout_ms: u32,
    /// Max bytes accepted for `Event::content`.
    pub max_content_bytes: usize,
    /// Dedupe time bucket, seconds.
    pub dedupe_bucket_secs: i64,

    /// Outbox claim batch size.
    pub outbox_batch_size: usize,
    /// Outbox worker poll interval, milliseconds.
    pub outbox_poll_interval_ms: u64,
    /// Max retry attempts before an outbox item is left `failed`.
    pub outbox_max_retries: u32,
    /// Age after which a `processing` outbox row is considered orphaned.
    pub outbox_stale_after_secs: i64,

    /// Working-set cap (event count).
    pub working_set_max_events: usize,
    /// Working-set time window, hours.
    pub working_set_time_window_hours: i64,
    /// Consolidation trigger: event count since last run.
    pub trigger_event_count: usize,
    /// Consolidation trigger: wall-clock since last run, milliseconds.
    pub trigger_interval_ms: u64,
    /// Consolidation trigger: idle gap, milliseconds.
    pub trigger_idle_ms: u64,
    /// Minimum Jaccard similarity for clustering working-set events.
    pub min_cluster_similarity: f64,
    /// Confidence floor for promoting a consolidated memory to a rule.
    pub rule_threshold: f64,
    /// Minimum recurrences of a topic set required for rule promotion.
    pub min_recurrences: usize,
    /// Minimum coverage ratio for the quality guard.
    pub min_coverage: f64,

    /// Minimum confidence for a troubleshooting entry to be shared-promotable.
    pub min_confidence_for_promotion: f64,

    /// Retrieval score floor for `confidence = suggested`.
    pub retriever_min_score: f64,
    /// Retrieval score floor for `confidence = high`.
    pub retriever_high_threshold: f64,

    /// Continuity decay constant, hours.
    pub continuity_decay_hours: f64,
    /// Score floor for a `seamless` transition.
    pub min_score_for_seamless: f64,

    /// Tool names skipped by the `post-tool-use` hook by default.
    pub excluded_tools: Vec<String>,
    /// If true, failed tool invocations are not stored.
    pub store_only_on_success: bool,

    /// Dotted metadata paths redacted by the privacy-filter ingest hook.
    pub redact_metadata_paths: Vec<String>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            busy_timeout_ms: 5_000,
            max_content_bytes: 1_000_000,
            dedupe_bucket_secs: 60,

            outbox_batch_size: 16,
            outbox_poll_interval_ms: 1_000,
            outbox_max_retries: 5,
            outbox_stale_after_secs: 300,

            working_set_max_events: 200,
            working_set_time_window_hours: 24,
            trigger_event_count: 50,
            trigger_interval_ms: 15 * 60 * 1000,
            trigger_idle_ms: 5 * 60 * 1000,
            min_cluster_similarity: 0.3,
            rule_threshold: 0.8,
            min_recurrences: 2,
            min_coverage: 0.5,

            min_confidence_for_promotion: 0.8,

            retriever_min_score: 0.4,
            retriever_high_threshold: 0.85,

            continuity_decay_hours: 2.0,
            min_score_for_seamless: 0.6,

            excluded_tools: vec!["TodoWrite".to_string(), "TodoRead".to_string()],
            store_only_on_success: false,

            redact_metadata_paths: vec!["secret".to_string(), "credentials".to_string()],
        }
    }
}

impl MemoryConfig {
    /// Build config from defaults overridden by `CML_*` environment
    /// variables. Unparseable values fall back to the default silently,
    /// matching the teacher's permissive env parsing.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = std::env::var("CML_DB_PATH") {
            cfg.db_path = PathBuf::from(path);
        }
        if let Some(v) = env_u32("CML_BUSY_TIMEOUT_MS") {
            cfg.busy_timeout_ms = v;
        }
        if let Some(v) = env_usize("CML_MAX_CONTENT_BYTES") {
            cfg.max_content_bytes = v;
        }
        if let Some(v) = env_usize("CML_OUTBOX_BATCH_SIZE") {
            cfg.outbox_batch_size = v;
        }
        if let Some(v) = env_u64("CML_OUTBOX_POLL_INTERVAL_MS") {
            cfg.outbox_poll_interval_ms = v;
        }
        if let Some(v) = env_u32("CML_OUTBOX_MAX_RETRIES") {
            cfg.outbox_max_retries = v;
        }
        if let Some(v) = env_f64("CML_RETRIEVER_MIN_SCORE") {
            cfg.retriever_min_score = v;
        }
        if let Some(v) = env_f64("CML_RETRIEVER_HIGH_THRESHOLD") {
            cfg.retriever_high_threshold = v;
        }
        if let Ok(v) = std::env::var("CML_STORE_ONLY_ON_SUCCESS") {
            cfg.store_only_on_success = v == "1" || v.eq_ignore_ascii_case("true");
        }

        cfg
    }
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}
fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// `~/.claude-code/memory/projects/<hash8>/events.sqlite`, `<hash8>` being
/// the first 8 hex chars of the SHA-256 of the normalized CWD.
fn default_db_path() -> PathBuf {
    let base = ProjectDirs::from("com", "claude-code", "memory")
        .map(|p| p.data_dir().join("projects"))
        .unwrap_or_else(|| PathBuf::from(".claude-code/memory/projects"));

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let hash8 = project_hash8(&cwd.to_string_lossy());

    base.join(hash8).join("events.sqlite")
}

/// First 8 hex characters of SHA-256 over a normalized project path.
pub fn project_hash8(path: &str) -> String {
    use sha2::{Digest, Sha256};
    let normalized = path.trim_end_matches('/');
    let digest = Sha256::digest(normalized.as_bytes());
    hex_prefix(&digest, 8)
}

fn hex_prefix(bytes: &[u8], n: usize) -> String {
    bytes.iter().take(n.div_ceil(2)).fold(String::new(), |mut s, b| {
        use std::fmt::Write;
        let _ = write!(s, "{b:02x}");
        s
    })[..n]
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash8_is_deterministic_and_8_chars() {
        let a = project_hash8("/home/user/project");
        let b = project_hash8("/home/user/project");
        let c = project_hash8("/home/user/project/");
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.len(), 8);
    }

    #[test]
    fn default_config_has_sane_values() {
        let cfg = MemoryConfig::default();
        assert!(cfg.outbox_batch_size > 0);
        assert!(cfg.retriever_high_threshold > cfg.retriever_min_score);
    }
}
