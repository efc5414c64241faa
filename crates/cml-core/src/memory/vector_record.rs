use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::MetaValue;

/// `spec.md` §3: a content-addressed vector entry, `id` derived directly from
/// `event_id` (content-addressing, so re-embedding the same event updates the
/// same row rather than appending a new one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub event_id: String,
    pub session_id: String,
    pub event_type: String,
    pub content: String,
    pub vector: Vec<f32>,
    pub timestamp: DateTime<Utc>,
    pub metadata: MetaValue,
}

impl VectorRecord {
    pub fn for_event(event_id: impl Into<String>) -> String {
        event_id.into()
    }
}
