//! Keyword search support for C1's `keyword_search`.
//!
//! The teacher's `search` module exposes a `keyword::sanitize_fts5_query`
//! but the retrieved pack does not include `search/keyword.rs` or
//! `search/temporal.rs` alongside it (see DESIGN.md); this module is
//! authored fresh in the teacher's idiom to fill that gap.

mod keyword;

pub use keyword::sanitize_fts5_query;
