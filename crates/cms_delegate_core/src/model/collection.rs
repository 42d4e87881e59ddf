//! Collection descriptors and the path → storage target registry.
//!
//! # Responsibility
//! - Describe where and how a family of entities is stored.
//! - Resolve collection paths to descriptors for the repository.
//!
//! # Invariants
//! - Paths and storage targets match `[A-Za-z0-9_-]+(/[A-Za-z0-9_-]+)*`.
//! - A path is registered at most once.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

static COLLECTION_PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(/[A-Za-z0-9_-]+)*$").expect("valid collection path regex")
});

/// Declared shape of one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKind {
    String,
    Number,
    Boolean,
    Date,
    Array,
    Map,
    Reference,
}

/// Static metadata for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionDescriptor {
    pub path: String,
    #[serde(default)]
    pub database_id: Option<String>,
    /// Physical partition name. Defaults to `path`.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyKind>,
    #[serde(default = "default_text_search")]
    pub text_search_enabled: bool,
}

fn default_text_search() -> bool {
    true
}

impl CollectionDescriptor {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            database_id: None,
            target: None,
            properties: BTreeMap::new(),
            text_search_enabled: true,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, kind: PropertyKind) -> Self {
        self.properties.insert(name.into(), kind);
        self
    }

    pub fn storage_target(&self) -> &str {
        self.target.as_deref().unwrap_or(self.path.as_str())
    }
}

/// Collection registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionRegistryError {
    InvalidPath(String),
    InvalidTarget(String),
    DuplicatePath(String),
}

impl Display for CollectionRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(value) => write!(f, "collection path is invalid: `{value}`"),
            Self::InvalidTarget(value) => write!(f, "storage target is invalid: `{value}`"),
            Self::DuplicatePath(value) => write!(f, "collection already registered: `{value}`"),
        }
    }
}

impl Error for CollectionRegistryError {}

/// Registered collections keyed by path.
#[derive(Debug, Clone, Default)]
pub struct CollectionRegistry {
    collections: BTreeMap<String, CollectionDescriptor>,
}

impl CollectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one descriptor.
    pub fn register(
        &mut self,
        descriptor: CollectionDescriptor,
    ) -> Result<(), CollectionRegistryError> {
        let path = descriptor.path.trim().to_string();
        if !is_valid_collection_path(&path) {
            return Err(CollectionRegistryError::InvalidPath(path));
        }
        if let Some(target) = descriptor.target.as_deref() {
            if !is_valid_collection_path(target) {
                return Err(CollectionRegistryError::InvalidTarget(target.to_string()));
            }
        }
        if self.collections.contains_key(&path) {
            return Err(CollectionRegistryError::DuplicatePath(path));
        }

        self.collections.insert(
            path.clone(),
            CollectionDescriptor {
                path,
                ..descriptor
            },
        );
        Ok(())
    }

    /// Builder-style registration used by tests and setup code.
    pub fn with(
        mut self,
        descriptor: CollectionDescriptor,
    ) -> Result<Self, CollectionRegistryError> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn get(&self, path: &str) -> Option<&CollectionDescriptor> {
        self.collections.get(path.trim())
    }

    pub fn paths(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

pub fn is_valid_collection_path(value: &str) -> bool {
    COLLECTION_PATH_RE.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::{CollectionDescriptor, CollectionRegistry, CollectionRegistryError};

    #[test]
    fn storage_target_defaults_to_path() {
        let descriptor = CollectionDescriptor::new("users");
        assert_eq!(descriptor.storage_target(), "users");

        let mut mapped = CollectionDescriptor::new("users");
        mapped.target = Some("app_users".to_string());
        assert_eq!(mapped.storage_target(), "app_users");
    }

    #[test]
    fn register_rejects_duplicates_and_bad_paths() {
        let mut registry = CollectionRegistry::new();
        registry
            .register(CollectionDescriptor::new("users"))
            .expect("first registration");

        let duplicate = registry
            .register(CollectionDescriptor::new(" users "))
            .expect_err("duplicate must fail");
        assert_eq!(
            duplicate,
            CollectionRegistryError::DuplicatePath("users".to_string())
        );

        let invalid = registry
            .register(CollectionDescriptor::new("users//orders"))
            .expect_err("empty segment must fail");
        assert!(matches!(invalid, CollectionRegistryError::InvalidPath(_)));
    }

    #[test]
    fn subcollection_paths_are_accepted() {
        let registry = CollectionRegistry::new()
            .with(CollectionDescriptor::new("users/u1/orders"))
            .expect("nested path registration");
        assert!(registry.get("users/u1/orders").is_some());
        assert_eq!(registry.len(), 1);
    }
}
