//! Repository layer: the data-source delegate and its SQLite implementation.
//!
//! # Responsibility
//! - Define the delegate contract plus its optional capabilities.
//! - Isolate SQL and JSON1 details from callers.
//!
//! # Invariants
//! - Writes run inbound value translation before touching SQL.
//! - Repository APIs return semantic errors (`UnknownCollection`,
//!   `InvalidQuery`) in addition to DB transport errors.

pub mod entity_repo;
pub mod query;
