//! Core of the CMS data-source delegate.
//! Bridges generic CMS entity operations to SQLite and guarantees that every
//! committed save or delete is followed by one change notification.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;
pub mod search;

pub use config::{ConfigError, DelegateConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::collection::{
    CollectionDescriptor, CollectionRegistry, CollectionRegistryError, PropertyKind,
};
pub use model::convert::{
    cms_to_delegate_model, cms_values_to_delegate, delegate_to_cms_model, set_date_to_midnight,
};
pub use model::entity::{ChangeEvent, Entity, EntityStatus};
pub use model::value::{
    check_storable_fields, EntityReference, EntityValues, Value, ValueError,
};
pub use notify::{
    ChangeNotifier, ListenerId, NotifyError, NotifyFailurePolicy, NotifyResult, SubscriptionHub,
    SubscriptionScope,
};
pub use repo::entity_repo::{
    DataSourceDelegate, EntityCounter, FilterCombinationCheck, RepoError, RepoResult,
    RepositoryOptions, SaveEntityRequest, SqliteEntityRepository,
};
pub use repo::query::{
    EntityCursor, FetchCollectionQuery, FieldFilter, FilterOp, OrderBy, OrderDirection,
};
pub use search::fts::SearchError;

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
