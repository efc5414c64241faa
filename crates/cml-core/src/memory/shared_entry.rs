use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `spec.md` §3/§4.6: cross-project troubleshooting knowledge, unique on
/// `(source_project_hash, source_entry_id)`. Promotion conflict resolves with
/// a max-merge on `confidence`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedTroubleshootingEntry {
    pub entry_id: String,
    pub source_project_hash: String,
    pub source_entry_id: String,
    pub title: String,
    pub symptoms: Vec<String>,
    pub root_cause: String,
    pub solution: String,
    pub topics: Vec<String>,
    pub technologies: Vec<String>,
    pub confidence: f64,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub promoted_at: DateTime<Utc>,
}
