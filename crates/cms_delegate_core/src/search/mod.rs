//! Full-text search entry points.
//!
//! # Responsibility
//! - Maintain the SQLite FTS5 index over entity text values.
//! - Answer `fetch_collection` calls that carry a search string.

pub mod fts;
