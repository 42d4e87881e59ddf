//! Delegate configuration loaded from JSON.
//!
//! # Responsibility
//! - Describe collections, notification policy, search limits and logging.
//! - Validate the document and build a `CollectionRegistry` from it.
//!
//! # Invariants
//! - A config that parses but names an invalid or duplicate collection is
//!   rejected as a whole.

use crate::model::collection::{CollectionDescriptor, CollectionRegistry};
use crate::notify::NotifyFailurePolicy;
use crate::repo::entity_repo::{RepositoryOptions, DEFAULT_SEARCH_LIMIT};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelegateConfig {
    #[serde(default)]
    pub collections: Vec<CollectionDescriptor>,
    #[serde(default)]
    pub notify_failure: NotifyFailurePolicy,
    #[serde(default = "default_search_limit")]
    pub search_limit: u32,
    /// Store file; in-memory when absent.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_search_limit() -> u32 {
    DEFAULT_SEARCH_LIMIT
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            collections: Vec::new(),
            notify_failure: NotifyFailurePolicy::default(),
            search_limit: DEFAULT_SEARCH_LIMIT,
            database_path: None,
            log_level: None,
            log_dir: None,
        }
    }
}

impl DelegateConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_limit == 0 {
            return Err(ConfigError::Invalid(
                "search_limit must be greater than zero".to_string(),
            ));
        }
        self.collection_registry().map(|_| ())
    }

    pub fn collection_registry(&self) -> Result<CollectionRegistry, ConfigError> {
        let mut registry = CollectionRegistry::new();
        for descriptor in &self.collections {
            registry
                .register(descriptor.clone())
                .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        }
        Ok(registry)
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            notify_failure: self.notify_failure,
            default_search_limit: self.search_limit,
        }
    }
}
