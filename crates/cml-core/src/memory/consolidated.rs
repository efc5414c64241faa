use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `spec.md` §3: a derived summary over a cluster of source events (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsolidatedMemory {
    pub memory_id: String,
    pub summary: String,
    pub topics: Vec<String>,
    pub source_event_ids: Vec<String>,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// `spec.md` §3: a promoted, high-confidence generalization over consolidated
/// memories (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub text: String,
    pub source_memory_ids: Vec<String>,
    pub confidence: f64,
}
