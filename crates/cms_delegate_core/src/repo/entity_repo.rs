//! Data-source delegate contracts and the SQLite entity repository.
//!
//! # Responsibility
//! - Translate CMS fetch/save/delete/count/uniqueness requests into SQL.
//! - Run inbound value translation before every write.
//! - Notify the injected `ChangeNotifier` after every committed mutation.
//!
//! # Invariants
//! - A save or delete notifies exactly once, only after its transaction
//!   committed, with the full saved entity or a deletion marker.
//! - A failed mutation never notifies.
//! - Values that would not read back unchanged are rejected before the
//!   transaction opens.
//! - Reads have no notification side effect.
//! - Calls without a database id use the collection descriptor's one.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::collection::{CollectionDescriptor, CollectionRegistry};
use crate::model::convert::{
    cms_to_delegate_model, cms_values_to_delegate, delegate_to_cms_model,
    delegate_values_to_cms, set_date_to_midnight,
};
use crate::model::entity::{ChangeEvent, Entity, EntityStatus};
use crate::model::value::{check_storable_fields, EntityValues, Value, ValueError};
use crate::notify::{ChangeNotifier, NotifyError, NotifyFailurePolicy};
use crate::repo::query::{
    build_collection_select, build_unique_probe, FetchCollectionQuery, FieldFilter, OrderBy,
    ENTITY_COLUMNS,
};
use crate::search::fts::{self, EntitySearch, SearchError};
use log::{debug, error, info, warn};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// Text search result cap when the query carries no limit.
pub const DEFAULT_SEARCH_LIMIT: u32 = 50;

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for entity persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    Db(DbError),
    Search(SearchError),
    /// No collection is registered for the path.
    UnknownCollection(String),
    InvalidQuery(String),
    InvalidRequest(String),
    InvalidData(String),
    /// The mutation committed but subscribers were not informed.
    Notify(NotifyError),
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Search(err) => write!(f, "{err}"),
            Self::UnknownCollection(path) => write!(f, "no collection registered for `{path}`"),
            Self::InvalidQuery(message) => write!(f, "invalid collection query: {message}"),
            Self::InvalidRequest(message) => write!(f, "invalid request: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted entity data: {message}"),
            Self::Notify(err) => write!(f, "mutation committed, notification failed: {err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "connection schema version {actual_version} does not match expected {expected_version}"
            ),
            Self::MissingRequiredTable(table) => write!(f, "required table `{table}` is missing"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Search(err) => Some(err),
            Self::Notify(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<SearchError> for RepoError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}

impl From<ValueError> for RepoError {
    fn from(value: ValueError) -> Self {
        Self::InvalidData(value.to_string())
    }
}

/// Input of `save_entity`.
#[derive(Debug, Clone, PartialEq)]
pub struct SaveEntityRequest {
    pub path: String,
    /// Generated by the store when absent.
    pub entity_id: Option<String>,
    pub values: EntityValues,
    pub database_id: Option<String>,
    pub status: EntityStatus,
}

impl SaveEntityRequest {
    pub fn new(path: impl Into<String>, values: EntityValues) -> Self {
        Self {
            path: path.into(),
            entity_id: None,
            values,
            database_id: None,
            status: EntityStatus::New,
        }
    }

    pub fn existing(path: impl Into<String>, id: impl Into<String>, values: EntityValues) -> Self {
        Self {
            path: path.into(),
            entity_id: Some(id.into()),
            values,
            database_id: None,
            status: EntityStatus::Existing,
        }
    }
}

/// Required data-source operations.
pub trait DataSourceDelegate {
    fn fetch_collection(&self, query: &FetchCollectionQuery) -> RepoResult<Vec<Entity>>;

    /// `Ok(None)` means not found.
    fn fetch_entity(
        &self,
        path: &str,
        entity_id: &str,
        database_id: Option<&str>,
    ) -> RepoResult<Option<Entity>>;

    fn save_entity(&self, request: &SaveEntityRequest) -> RepoResult<Entity>;

    fn delete_entity(
        &self,
        path: &str,
        entity_id: &str,
        database_id: Option<&str>,
    ) -> RepoResult<()>;

    /// `true` when no other entity at `path` holds `value` in `field`.
    fn check_unique_field(
        &self,
        path: &str,
        field: &str,
        value: &Value,
        excluding_id: Option<&str>,
        database_id: Option<&str>,
    ) -> RepoResult<bool>;

    /// New identifier; nothing is written.
    fn generate_entity_id(&self, path: &str) -> String;

    fn delegate_to_cms_model(&self, value: &Value) -> Value {
        delegate_to_cms_model(value)
    }

    fn cms_to_delegate_model(&self, value: &Value) -> Value {
        cms_to_delegate_model(value)
    }

    fn set_date_to_midnight(&self, value: &Value) -> Value {
        set_date_to_midnight(value)
    }

    /// Optional counting capability.
    fn counter(&self) -> Option<&dyn EntityCounter> {
        None
    }

    /// Optional filter-combination capability.
    fn filter_checker(&self) -> Option<&dyn FilterCombinationCheck> {
        None
    }
}

/// Optional capability: count entities in a collection.
pub trait EntityCounter {
    fn count_entities(&self, path: &str, database_id: Option<&str>) -> RepoResult<u64>;
}

/// Optional capability: report whether the backend supports a filter/order
/// combination.
pub trait FilterCombinationCheck {
    fn is_filter_combination_valid(
        &self,
        path: &str,
        filters: &[FieldFilter],
        order_by: Option<&OrderBy>,
    ) -> bool;
}

/// Tunables applied by the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepositoryOptions {
    pub notify_failure: NotifyFailurePolicy,
    pub default_search_limit: u32,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            notify_failure: NotifyFailurePolicy::BestEffort,
            default_search_limit: DEFAULT_SEARCH_LIMIT,
        }
    }
}

/// Collection resolved for one call.
struct Scope<'a> {
    descriptor: &'a CollectionDescriptor,
    database_id: Option<String>,
}

impl Scope<'_> {
    /// Storage key form; absent database id is stored as ''.
    fn db_key(&self) -> &str {
        self.database_id.as_deref().unwrap_or("")
    }

    fn target(&self) -> &str {
        self.descriptor.storage_target()
    }
}

/// SQLite-backed data-source delegate.
pub struct SqliteEntityRepository<'conn, N: ChangeNotifier> {
    conn: &'conn Connection,
    collections: CollectionRegistry,
    notifier: N,
    options: RepositoryOptions,
}

impl<'conn, N: ChangeNotifier> SqliteEntityRepository<'conn, N> {
    /// Constructs a repository from a migrated connection.
    pub fn try_new(
        conn: &'conn Connection,
        collections: CollectionRegistry,
        notifier: N,
    ) -> RepoResult<Self> {
        ensure_connection_ready(conn)?;
        Ok(Self {
            conn,
            collections,
            notifier,
            options: RepositoryOptions::default(),
        })
    }

    pub fn with_options(mut self, options: RepositoryOptions) -> Self {
        self.options = options;
        self
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    fn resolve(&self, path: &str, database_id: Option<&str>) -> RepoResult<Scope<'_>> {
        let descriptor = self
            .collections
            .get(path)
            .ok_or_else(|| RepoError::UnknownCollection(path.to_string()))?;
        let database_id = database_id
            .map(str::to_string)
            .or_else(|| descriptor.database_id.clone())
            .filter(|value| !value.is_empty());
        Ok(Scope {
            descriptor,
            database_id,
        })
    }

    fn dispatch(&self, event: &ChangeEvent) -> RepoResult<()> {
        match self.notifier.notify(event) {
            Ok(()) => {
                debug!(
                    "event=change_notify module=repo status=ok path={} deleted={}",
                    event.path,
                    event.is_deletion()
                );
                Ok(())
            }
            Err(err) => match self.options.notify_failure {
                NotifyFailurePolicy::BestEffort => {
                    warn!(
                        "event=change_notify module=repo status=error policy=best_effort path={} error={}",
                        event.path, err
                    );
                    Ok(())
                }
                NotifyFailurePolicy::Propagate => {
                    error!(
                        "event=change_notify module=repo status=error policy=propagate path={} error={}",
                        event.path, err
                    );
                    Err(RepoError::Notify(err))
                }
            },
        }
    }

    fn search_collection(
        &self,
        scope: &Scope<'_>,
        query: &FetchCollectionQuery,
        text: &str,
    ) -> RepoResult<Vec<Entity>> {
        if !scope.descriptor.text_search_enabled {
            return Err(RepoError::InvalidQuery(format!(
                "text search is disabled for `{}`",
                scope.descriptor.path
            )));
        }

        let search = EntitySearch {
            database_id: scope.db_key(),
            target: scope.target(),
            text,
            limit: query.limit.unwrap_or(self.options.default_search_limit),
        };
        let ids = fts::search_entity_ids(self.conn, &search)?;
        self.load_in_order(scope, &ids)
    }

    fn load_in_order(&self, scope: &Scope<'_>, ids: &[String]) -> RepoResult<Vec<Entity>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE database_id = ? AND target = ? AND id IN ({placeholders});"
        );
        let binds = [scope.db_key(), scope.target()]
            .into_iter()
            .chain(ids.iter().map(String::as_str));
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;

        let mut loaded = HashMap::new();
        while let Some(row) = rows.next()? {
            let entity = parse_entity_row(row)?;
            loaded.insert(entity.id.clone(), entity);
        }

        Ok(ids.iter().filter_map(|id| loaded.remove(id)).collect())
    }
}

impl<N: ChangeNotifier> DataSourceDelegate for SqliteEntityRepository<'_, N> {
    fn fetch_collection(&self, query: &FetchCollectionQuery) -> RepoResult<Vec<Entity>> {
        let started_at = Instant::now();
        let scope = self.resolve(&query.path, query.database_id.as_deref())?;

        let entities = match query.effective_search() {
            Some(text) => self.search_collection(&scope, query, text)?,
            None => {
                let built = build_collection_select(scope.db_key(), scope.target(), query)?;
                let mut stmt = self.conn.prepare(&built.sql)?;
                let mut rows = stmt.query(params_from_iter(built.binds))?;
                let mut entities = Vec::new();
                while let Some(row) = rows.next()? {
                    entities.push(parse_entity_row(row)?);
                }
                entities
            }
        };

        debug!(
            "event=collection_fetch module=repo status=ok path={} search={} count={} duration_ms={}",
            query.path,
            query.effective_search().is_some(),
            entities.len(),
            started_at.elapsed().as_millis()
        );
        Ok(entities)
    }

    fn fetch_entity(
        &self,
        path: &str,
        entity_id: &str,
        database_id: Option<&str>,
    ) -> RepoResult<Option<Entity>> {
        let scope = self.resolve(path, database_id)?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entities
             WHERE database_id = ?1 AND target = ?2 AND id = ?3;"
        ))?;
        let mut rows = stmt.query(params![scope.db_key(), scope.target(), entity_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_entity_row(row)?));
        }
        Ok(None)
    }

    fn save_entity(&self, request: &SaveEntityRequest) -> RepoResult<Entity> {
        let started_at = Instant::now();
        let scope = self.resolve(&request.path, request.database_id.as_deref())?;

        let entity_id = match (request.status, request.entity_id.as_deref()) {
            (EntityStatus::Existing, None) => {
                return Err(RepoError::InvalidRequest(
                    "saving an existing entity requires an id".to_string(),
                ));
            }
            (_, Some(id)) if id.trim().is_empty() => {
                return Err(RepoError::InvalidRequest(
                    "entity id must not be blank".to_string(),
                ));
            }
            (_, Some(id)) => id.to_string(),
            (_, None) => self.generate_entity_id(&request.path),
        };

        let values = cms_values_to_delegate(&request.values);
        check_storable_fields(&values)
            .map_err(|err| RepoError::InvalidRequest(err.to_string()))?;
        let values_json = Value::Map(values.clone()).to_json().to_string();

        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO entities (database_id, target, id, path, values_json)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (database_id, target, id) DO UPDATE SET
                path = excluded.path,
                values_json = excluded.values_json,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                scope.db_key(),
                scope.target(),
                entity_id.as_str(),
                request.path.as_str(),
                values_json
            ],
        )?;
        if scope.descriptor.text_search_enabled {
            fts::index_entity(&tx, scope.db_key(), scope.target(), &entity_id, &values)?;
        }
        tx.commit()?;

        let entity = Entity {
            id: entity_id,
            path: request.path.clone(),
            database_id: scope.database_id.clone(),
            values: delegate_values_to_cms(&values),
        };
        info!(
            "event=entity_save module=repo status=ok path={} status_kind={:?} duration_ms={}",
            entity.path,
            request.status,
            started_at.elapsed().as_millis()
        );

        self.dispatch(&ChangeEvent::saved(&entity))?;
        Ok(entity)
    }

    fn delete_entity(
        &self,
        path: &str,
        entity_id: &str,
        database_id: Option<&str>,
    ) -> RepoResult<()> {
        let scope = self.resolve(path, database_id)?;

        let tx = self.conn.unchecked_transaction()?;
        let removed = tx.execute(
            "DELETE FROM entities WHERE database_id = ?1 AND target = ?2 AND id = ?3;",
            params![scope.db_key(), scope.target(), entity_id],
        )?;
        fts::remove_entity(&tx, scope.db_key(), scope.target(), entity_id)?;
        tx.commit()?;

        info!(
            "event=entity_delete module=repo status=ok path={} removed_rows={}",
            path, removed
        );

        self.dispatch(&ChangeEvent::deleted(
            path,
            entity_id,
            scope.database_id.as_deref(),
        ))
    }

    fn check_unique_field(
        &self,
        path: &str,
        field: &str,
        value: &Value,
        excluding_id: Option<&str>,
        database_id: Option<&str>,
    ) -> RepoResult<bool> {
        let scope = self.resolve(path, database_id)?;
        let converted = cms_to_delegate_model(value);
        if converted.is_null_like() {
            return Ok(true);
        }

        let probe = build_unique_probe(
            scope.db_key(),
            scope.target(),
            field,
            &converted,
            excluding_id,
        )?;
        let taken: i64 =
            self.conn
                .query_row(&probe.sql, params_from_iter(probe.binds), |row| row.get(0))?;
        Ok(taken == 0)
    }

    fn generate_entity_id(&self, _path: &str) -> String {
        Uuid::new_v4().to_string()
    }

    fn counter(&self) -> Option<&dyn EntityCounter> {
        Some(self)
    }

    fn filter_checker(&self) -> Option<&dyn FilterCombinationCheck> {
        Some(self)
    }
}

impl<N: ChangeNotifier> EntityCounter for SqliteEntityRepository<'_, N> {
    fn count_entities(&self, path: &str, database_id: Option<&str>) -> RepoResult<u64> {
        let scope = self.resolve(path, database_id)?;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE database_id = ?1 AND target = ?2;",
            params![scope.db_key(), scope.target()],
            |row| row.get(0),
        )?;
        u64::try_from(count).map_err(|_| RepoError::InvalidData(format!("negative count {count}")))
    }
}

impl<N: ChangeNotifier> FilterCombinationCheck for SqliteEntityRepository<'_, N> {
    /// SQLite evaluates any combination; there are no compound-index limits.
    fn is_filter_combination_valid(
        &self,
        _path: &str,
        _filters: &[FieldFilter],
        _order_by: Option<&OrderBy>,
    ) -> bool {
        true
    }
}

fn parse_entity_row(row: &Row<'_>) -> RepoResult<Entity> {
    let id: String = row.get("id")?;
    let values_text: String = row.get("values_json")?;
    let json: serde_json::Value = serde_json::from_str(&values_text).map_err(|err| {
        RepoError::InvalidData(format!("entity `{id}` has unreadable values_json: {err}"))
    })?;
    let Value::Map(values) = Value::from_json(&json)? else {
        return Err(RepoError::InvalidData(format!(
            "entity `{id}` values_json is not an object"
        )));
    };

    let database_id: String = row.get("database_id")?;
    Ok(Entity {
        id,
        path: row.get("path")?,
        database_id: Some(database_id).filter(|value| !value.is_empty()),
        values: delegate_values_to_cms(&values),
    })
}

fn ensure_connection_ready(conn: &Connection) -> RepoResult<()> {
    let actual_version: u32 =
        conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    let expected_version = latest_version();
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    for table in ["entities", "entities_fts"] {
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table],
            |row| row.get(0),
        )?;
        if exists != 1 {
            return Err(RepoError::MissingRequiredTable(table));
        }
    }
    Ok(())
}
