//! # cml-core
//!
//! Conversational memory engine library: captures agent/user conversation
//! events, embeds and indexes them for hybrid retrieval, consolidates
//! recurring patterns into durable memories and rules, tracks continuity
//! across sessions, and replicates across peer stores.
//!
//! ## Components
//!
//! - **C1 Event Store** (`store`) — append-only event log with FTS5 keyword
//!   search, dedupe, and an embedding outbox.
//! - **C2 Vector Store** (`vector`) — content-addressed cosine similarity
//!   index over embedded events, durable in SQLite.
//! - **C3 Outbox & Vector Worker** (`outbox`, `embeddings`) — single-writer
//!   pipeline draining the outbox into the vector store.
//! - **C4 Edge/Entity Repo** (`graph`) — typed relationship edges between
//!   entities, with blocker resolution and related-entry traversal.
//! - **C5 Working-Set Store & Consolidation Worker** (`consolidation`) —
//!   clusters recent events by topic overlap into consolidated memories and
//!   promotes recurring clusters to rules.
//! - **C6 Shared Store & Promoter** (`shared`) — cross-project troubleshooting
//!   knowledge base with max-merge promotion.
//! - **C7 Retriever** (`retriever`) — fast/hybrid/deep retrieval strategies
//!   with confidence labelling.
//! - **C8 Continuity Manager** (`continuity`) — scores context transitions
//!   between sessions.
//! - **C9 Ingest Interceptor Registry** (`interceptors`) — before/after
//!   ingest hooks (project scoping, privacy redaction).
//! - **C10 Replication Feed** (`replication`) — pull-cursor sync between
//!   peer event stores.
//!
//! [`service::MemoryService`] is the composition root wiring all ten
//! together; it is constructed explicitly rather than reached for as a
//! global.
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local embedding generation via `fastembed`.
//! - `vector-search` (default): HNSW vector search via `usearch`.
//! - `bundled-sqlite` (default): statically link SQLite via `rusqlite`'s
//!   `bundled` feature.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod consolidation;
pub mod continuity;
pub mod embeddings;
pub mod error;
pub mod graph;
pub mod interceptors;
pub mod memory;
pub mod metadata;
pub mod outbox;
pub mod replication;
pub mod retriever;
pub mod search;
pub mod service;
pub mod shared;
pub mod store;
pub mod vector;

pub use config::MemoryConfig;
pub use continuity::{ContextSnapshot, ContinuityManager};
pub use embeddings::{Embedder, HashingEmbedder};
#[cfg(feature = "embeddings")]
pub use embeddings::FastEmbedder;
pub use error::{MemoryError, Result};
pub use graph::EdgeRepo;
pub use interceptors::{BeforeIngestHook, AfterIngestHook, InterceptorRegistry};
pub use memory::{
    ConsolidatedMemory, Confidence, ContinuityLog, Edge, Event, EventType, MemoryLevel, OutboxItem,
    OutboxStatus, RelType, Rule, SharedTroubleshootingEntry, TransitionType, VectorRecord,
};
pub use metadata::MetaValue;
pub use outbox::{OutboxSource, OutboxWorker};
pub use replication::{pull_from_path, pull_once, PullReport};
pub use retriever::{RetrieveOptions, RetrieveResult, Retriever, ScoredEvent, Strategy};
pub use service::{MemoryService, SyncGapFix, SyncGapReport};
pub use shared::{PromotionCandidate, PromotionOutcome, SharedStore};
pub use store::{AppendOutcome, EventStore};
pub use vector::{VectorHit, VectorStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage.
pub mod prelude {
    pub use crate::{
        Confidence, EdgeRepo, Embedder, Event, EventStore, MemoryConfig, MemoryError,
        MemoryService, RetrieveOptions, RetrieveResult, Retriever, Rule, SharedStore, VectorStore,
    };
}
