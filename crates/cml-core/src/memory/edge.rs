use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metadata::MetaValue;

/// `spec.md` §3: relation type between two graph nodes. Generalized from the
/// teacher's fixed `EdgeType` enum to this system's narrower, entry-focused
/// relation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelType {
    EvidenceOf,
    BlockedBy,
    ResolvesTo,
    Cites,
    DerivedFrom,
}

impl RelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelType::EvidenceOf => "evidence_of",
            RelType::BlockedBy => "blocked_by",
            RelType::ResolvesTo => "resolves_to",
            RelType::Cites => "cites",
            RelType::DerivedFrom => "derived_from",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "evidence_of" => RelType::EvidenceOf,
            "blocked_by" => RelType::BlockedBy,
            "resolves_to" => RelType::ResolvesTo,
            "cites" => RelType::Cites,
            "derived_from" => RelType::DerivedFrom,
            _ => return None,
        })
    }
}

/// `spec.md` §3: typed edge between two nodes, unique on `(src_id, rel_type,
/// dst_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub edge_id: String,
    pub src_type: String,
    pub src_id: String,
    pub rel_type: RelType,
    pub dst_type: String,
    pub dst_id: String,
    pub meta: MetaValue,
    pub created_at: DateTime<Utc>,
}
