//! Entity and change-event records.
//!
//! # Invariants
//! - `(path, id, database_id)` identifies one entity for its whole lifetime.
//! - `values` is replaced wholesale on every save.
//! - A `ChangeEvent` always carries a complete snapshot or a deletion marker.

use crate::model::value::{EntityValues, Value};
use serde::{Deserialize, Serialize};

/// One stored record in a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub path: String,
    pub database_id: Option<String>,
    pub values: EntityValues,
}

impl Entity {
    pub fn new(path: impl Into<String>, id: impl Into<String>, values: EntityValues) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            database_id: None,
            values,
        }
    }

    pub fn with_database_id(mut self, database_id: impl Into<String>) -> Self {
        self.database_id = Some(database_id.into());
        self
    }

    /// Returns one field value, if present.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }
}

/// Save lifecycle requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Create a new entity; an id is generated when none is supplied.
    #[default]
    New,
    /// Overwrite an entity the caller already knows by id.
    Existing,
    /// Duplicate of another entity; treated as a new write.
    Copy,
}

/// Post-mutation notification payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub path: String,
    pub entity_id: String,
    /// `Some` for create/update, `None` for delete.
    pub snapshot: Option<Entity>,
    pub database_id: Option<String>,
}

impl ChangeEvent {
    pub fn saved(entity: &Entity) -> Self {
        Self {
            path: entity.path.clone(),
            entity_id: entity.id.clone(),
            snapshot: Some(entity.clone()),
            database_id: entity.database_id.clone(),
        }
    }

    pub fn deleted(path: &str, entity_id: &str, database_id: Option<&str>) -> Self {
        Self {
            path: path.to_string(),
            entity_id: entity_id.to_string(),
            snapshot: None,
            database_id: database_id.map(str::to_string),
        }
    }

    pub fn is_deletion(&self) -> bool {
        self.snapshot.is_none()
    }
}
