use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `spec.md` §3: outbox item state machine `pending -> processing -> (done |
/// failed)`. A `failed` row with `attempt_count < max_retries` may return to
/// `pending` via retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Done,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Processing => "processing",
            OutboxStatus::Done => "done",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => OutboxStatus::Pending,
            "processing" => OutboxStatus::Processing,
            "done" => OutboxStatus::Done,
            "failed" => OutboxStatus::Failed,
            _ => return None,
        })
    }
}

/// A row in the embedding outbox (C3's unit of work).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxItem {
    pub id: i64,
    pub event_id: String,
    pub content: String,
    pub status: OutboxStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
