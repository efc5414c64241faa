use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::MetaValue;

/// `spec.md` §3: `event_type ∈ {user_prompt, agent_response, tool_observation,
/// session_summary, consolidated, rule}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    UserPrompt,
    AgentResponse,
    ToolObservation,
    SessionSummary,
    Consolidated,
    Rule,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::UserPrompt => "user_prompt",
            EventType::AgentResponse => "agent_response",
            EventType::ToolObservation => "tool_observation",
            EventType::SessionSummary => "session_summary",
            EventType::Consolidated => "consolidated",
            EventType::Rule => "rule",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "user_prompt" => EventType::UserPrompt,
            "agent_response" => EventType::AgentResponse,
            "tool_observation" => EventType::ToolObservation,
            "session_summary" => EventType::SessionSummary,
            "consolidated" => EventType::Consolidated,
            "rule" => EventType::Rule,
            _ => return None,
        })
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Memory tier, promoted L0 -> L1 -> L2 by C5. Created as `L0` on insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryLevel {
    L0,
    L1,
    L2,
}

impl MemoryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryLevel::L0 => "L0",
            MemoryLevel::L1 => "L1",
            MemoryLevel::L2 => "L2",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "L0" => MemoryLevel::L0,
            "L1" => MemoryLevel::L1,
            "L2" => MemoryLevel::L2,
            _ => return None,
        })
    }
}

/// An immutable (save for access counters) event in the ingest log.
///
/// `rowid` is `None` until the row has been assigned one by the store; it is
/// exposed only for replication cursors, never for ordering semantics a
/// caller should rely on outside that purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub session_id: String,
    pub turn_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    pub canonical_key: String,
    pub dedupe_key: String,
    pub metadata: MetaValue,
    pub rowid: Option<i64>,
}

impl Event {
    pub fn access_count(&self) -> u64 {
        self.metadata
            .get_path("access_count")
            .and_then(|v| v.as_scalar())
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    }

    pub fn last_accessed_at(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get_path("last_accessed_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Input to `EventStore::append`, before canonical/dedupe keys are computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppendInput {
    pub event_type: String,
    pub session_id: String,
    #[serde(default)]
    pub turn_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Result of `EventStore::append`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResult {
    pub id: String,
    pub success: bool,
    pub is_duplicate: bool,
}
