//! Domain types shared across components (spec.md §3 "Data Model").

mod consolidated;
mod edge;
mod event;
mod outbox;
mod shared_entry;
mod vector_record;

pub use consolidated::{ConsolidatedMemory, Rule};
pub use edge::{Edge, RelType};
pub use event::{Event, EventType, MemoryLevel};
pub use outbox::{OutboxItem, OutboxStatus};
pub use shared_entry::SharedTroubleshootingEntry;
pub use vector_record::VectorRecord;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transition classification between two `ContextSnapshot`s (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    Seamless,
    TopicShift,
    Break,
}

impl TransitionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionType::Seamless => "seamless",
            TransitionType::TopicShift => "topic_shift",
            TransitionType::Break => "break",
        }
    }
}

/// A logged continuity transition (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContinuityLog {
    pub log_id: String,
    pub from_context_id: String,
    pub to_context_id: String,
    pub score: f64,
    pub transition_type: TransitionType,
    pub created_at: DateTime<Utc>,
}

/// Confidence label attached to a retrieval result (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Suggested,
    Low,
    None,
}
