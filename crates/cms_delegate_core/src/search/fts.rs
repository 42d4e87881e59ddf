//! SQLite FTS5-based entity search.
//!
//! # Responsibility
//! - Keep one `entities_fts` row per indexed entity, holding its text values.
//! - Resolve a search string into ranked entity ids for one storage target.
//!
//! # Invariants
//! - Index writes run on the caller's transaction, so the index never lags
//!   behind a committed entity write.
//! - Each search term is quoted and prefix-matched; user text is never parsed
//!   as FTS5 syntax.
//! - Result ordering is deterministic by rank, then id.

use crate::db::DbError;
use crate::model::value::{EntityValues, Value};
use rusqlite::{params, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type for search APIs.
pub type SearchResult<T> = Result<T, SearchError>;

#[derive(Debug)]
pub enum SearchError {
    /// FTS5 rejected the match expression.
    InvalidQuery { query: String, message: String },
    Db(DbError),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "invalid full-text query `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidQuery { .. } => None,
            Self::Db(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Scoped search request.
#[derive(Debug, Clone)]
pub struct EntitySearch<'a> {
    pub database_id: &'a str,
    pub target: &'a str,
    pub text: &'a str,
    pub limit: u32,
}

/// Returns ids of entities whose text values match every search term.
///
/// Returns an empty list for blank text or a zero limit.
pub fn search_entity_ids(conn: &Connection, search: &EntitySearch<'_>) -> SearchResult<Vec<String>> {
    let Some(match_expr) = build_match_expression(search.text) else {
        return Ok(Vec::new());
    };
    if search.limit == 0 {
        return Ok(Vec::new());
    }

    let mut stmt = conn.prepare(
        "SELECT entity_id
         FROM entities_fts
         WHERE entities_fts MATCH ?1
           AND database_id = ?2
           AND target = ?3
         ORDER BY bm25(entities_fts), entity_id ASC
         LIMIT ?4;",
    )?;
    let mut rows = stmt
        .query(params![
            match_expr.as_str(),
            search.database_id,
            search.target,
            i64::from(search.limit)
        ])
        .map_err(|err| map_query_error(err, &match_expr))?;

    let mut ids = Vec::new();
    while let Some(row) = rows
        .next()
        .map_err(|err| map_query_error(err, &match_expr))?
    {
        ids.push(row.get(0)?);
    }
    Ok(ids)
}

/// Replaces the index row of one entity.
pub fn index_entity(
    conn: &Connection,
    database_id: &str,
    target: &str,
    entity_id: &str,
    values: &EntityValues,
) -> rusqlite::Result<()> {
    remove_entity(conn, database_id, target, entity_id)?;
    let text = extract_search_text(values);
    if text.is_empty() {
        return Ok(());
    }
    conn.execute(
        "INSERT INTO entities_fts (search_text, database_id, target, entity_id)
         VALUES (?1, ?2, ?3, ?4);",
        params![text, database_id, target, entity_id],
    )?;
    Ok(())
}

/// Drops the index row of one entity, if any.
pub fn remove_entity(
    conn: &Connection,
    database_id: &str,
    target: &str,
    entity_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM entities_fts
         WHERE database_id = ?1 AND target = ?2 AND entity_id = ?3;",
        params![database_id, target, entity_id],
    )?;
    Ok(())
}

/// Concatenates all text values (nested ones included) in field order.
pub fn extract_search_text(values: &EntityValues) -> String {
    let mut parts = Vec::new();
    for value in values.values() {
        collect_text(value, &mut parts);
    }
    parts.join(" ")
}

fn collect_text<'a>(value: &'a Value, parts: &mut Vec<&'a str>) {
    match value {
        Value::Text(text) if !text.trim().is_empty() => parts.push(text.as_str()),
        Value::Array(items) => items.iter().for_each(|item| collect_text(item, parts)),
        Value::Map(fields) => fields.values().for_each(|item| collect_text(item, parts)),
        _ => {}
    }
}

fn build_match_expression(text: &str) -> Option<String> {
    let terms = text
        .split_whitespace()
        .map(escape_fts_term)
        .collect::<Vec<_>>();

    if terms.is_empty() {
        return None;
    }
    Some(terms.join(" AND "))
}

fn escape_fts_term(raw: &str) -> String {
    let escaped = raw.replace('"', "\"\"");
    format!("\"{escaped}\"*")
}

fn map_query_error(err: rusqlite::Error, query: &str) -> SearchError {
    if is_match_syntax_error(&err) {
        return SearchError::InvalidQuery {
            query: query.to_string(),
            message: err.to_string(),
        };
    }

    SearchError::Db(DbError::Sqlite(err))
}

fn is_match_syntax_error(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let msg = message.to_lowercase();
            (msg.contains("fts5") && msg.contains("syntax"))
                || msg.contains("malformed match expression")
                || msg.contains("unterminated")
        }
        _ => false,
    }
}
