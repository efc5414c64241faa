//! Storage module (C1): SQLite event log with FTS5 keyword search, schema
//! migrations, and the outbox enqueue that feeds C2/C3.

mod events;
mod migrations;

pub use events::{AppendOutcome, EventStore};
pub use migrations::{apply_migrations, MIGRATIONS};
