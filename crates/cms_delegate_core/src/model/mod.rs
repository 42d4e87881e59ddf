//! CMS-facing domain model.
//!
//! # Responsibility
//! - Define the tagged value type, entities, change events and collection
//!   descriptors shared by the repository and notifier layers.
//! - Own the two value translation directions (CMS ↔ store).
//!
//! # Invariants
//! - Every entity is identified by `(path, id, database_id)`.
//! - Store-side values never contain `Value::Undefined`.

pub mod collection;
pub mod convert;
pub mod entity;
pub mod value;
