//! Collection query model and its SQL translation.
//!
//! # Responsibility
//! - Describe filters, ordering and keyset cursors for `fetch_collection`.
//! - Translate them into SQL over `entities.values_json` using JSON1.
//!
//! # Invariants
//! - Field names are validated before they reach a JSON path.
//! - All user values are bound as parameters, never interpolated.
//! - Results are always totally ordered: requested key first, then `id ASC`.
//! - Uniqueness probes also match the stored JSON type, so `true` never
//!   equals `1` and a date never equals its text form.

use crate::model::entity::Entity;
use crate::model::value::{date_to_sortable_text, reference_to_json, Value};
use crate::repo::entity_repo::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::Value as SqlValue;

static FIELD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid field name regex"));

/// Comparison operators accepted in collection filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Lt,
    Le,
    Eq,
    Ne,
    Ge,
    Gt,
    ArrayContains,
    ArrayContainsAny,
    In,
    NotIn,
}

impl FilterOp {
    /// Wire spelling used by CMS filter definitions.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Ge => ">=",
            Self::Gt => ">",
            Self::ArrayContains => "array-contains",
            Self::ArrayContainsAny => "array-contains-any",
            Self::In => "in",
            Self::NotIn => "not-in",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">=" => Some(Self::Ge),
            ">" => Some(Self::Gt),
            "array-contains" => Some(Self::ArrayContains),
            "array-contains-any" => Some(Self::ArrayContainsAny),
            "in" => Some(Self::In),
            "not-in" => Some(Self::NotIn),
            _ => None,
        }
    }

    fn takes_list(self) -> bool {
        matches!(self, Self::ArrayContainsAny | Self::In | Self::NotIn)
    }
}

/// One `field op value` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Keyset position: fetch rows strictly after this one.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityCursor {
    pub id: String,
    /// Value of the ordered field on the last row; `None` when absent.
    pub order_value: Option<Value>,
}

impl EntityCursor {
    /// Builds the cursor that continues after `entity` under `order_by`.
    pub fn after(entity: &Entity, order_by: Option<&OrderBy>) -> Self {
        let order_value = order_by
            .and_then(|order| entity.value(&order.field))
            .filter(|value| !value.is_null_like())
            .cloned();
        Self {
            id: entity.id.clone(),
            order_value,
        }
    }
}

/// Options for `fetch_collection`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchCollectionQuery {
    pub path: String,
    pub database_id: Option<String>,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
    pub start_after: Option<EntityCursor>,
    /// When non-blank, full-text search replaces filters and ordering.
    pub search_string: Option<String>,
}

impl FetchCollectionQuery {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Returns the trimmed search text when the search path applies.
    pub fn effective_search(&self) -> Option<&str> {
        self.search_string
            .as_deref()
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}

/// SQL text plus positional bind values.
#[derive(Debug, Default)]
pub(crate) struct SqlQuery {
    pub sql: String,
    pub binds: Vec<SqlValue>,
}

impl SqlQuery {
    fn push(&mut self, fragment: &str) {
        self.sql.push_str(fragment);
    }

    fn bind(&mut self, value: SqlValue) {
        self.binds.push(value);
    }

    /// Comparable key of one field: date text, reference json, or raw value.
    fn push_field_key(&mut self, field: &str) {
        self.push(
            "COALESCE(json_extract(values_json, ?), json_extract(values_json, ?), json_extract(values_json, ?))",
        );
        self.bind(SqlValue::Text(format!("$.\"{field}\".__date")));
        self.bind(SqlValue::Text(format!("$.\"{field}\".__ref")));
        self.bind(SqlValue::Text(format!("$.\"{field}\"")));
    }

    fn push_placeholders(&mut self, values: &[Value]) {
        let placeholders = vec!["?"; values.len()].join(", ");
        self.push(&format!("({placeholders})"));
        for value in values {
            self.bind(sql_key_value(value));
        }
    }
}

const ARRAY_ELEMENT_KEY: &str = "COALESCE(json_extract(values_json, json_each.fullkey || '.__date'), json_extract(values_json, json_each.fullkey || '.__ref'), json_each.value)";

pub(crate) const ENTITY_COLUMNS: &str = "id, path, database_id, values_json";

/// Builds the structured (non-search) select for one storage target.
pub(crate) fn build_collection_select(
    database_id: &str,
    target: &str,
    query: &FetchCollectionQuery,
) -> RepoResult<SqlQuery> {
    let mut out = SqlQuery::default();
    out.push(&format!(
        "SELECT {ENTITY_COLUMNS} FROM entities WHERE database_id = ? AND target = ?"
    ));
    out.bind(SqlValue::Text(database_id.to_string()));
    out.bind(SqlValue::Text(target.to_string()));

    for filter in &query.filters {
        out.push(" AND ");
        push_filter(&mut out, filter)?;
    }

    if let Some(order) = query.order_by.as_ref() {
        validate_field_name(&order.field)?;
    }

    if let Some(cursor) = query.start_after.as_ref() {
        out.push(" AND ");
        push_cursor(&mut out, cursor, query.order_by.as_ref());
    }

    match query.order_by.as_ref() {
        Some(order) => {
            out.push(" ORDER BY ");
            out.push_field_key(&order.field);
            out.push(match order.direction {
                OrderDirection::Asc => " ASC, id ASC",
                OrderDirection::Desc => " DESC, id ASC",
            });
        }
        None => out.push(" ORDER BY id ASC"),
    }

    if let Some(limit) = query.limit {
        out.push(" LIMIT ?");
        out.bind(SqlValue::Integer(i64::from(limit)));
    }

    Ok(out)
}

/// Builds the `EXISTS` probe used by uniqueness checks.
pub(crate) fn build_unique_probe(
    database_id: &str,
    target: &str,
    field: &str,
    value: &Value,
    excluding_id: Option<&str>,
) -> RepoResult<SqlQuery> {
    validate_field_name(field)?;
    let mut out = SqlQuery::default();
    out.push("SELECT EXISTS(SELECT 1 FROM entities WHERE database_id = ? AND target = ? AND ");
    out.bind(SqlValue::Text(database_id.to_string()));
    out.bind(SqlValue::Text(target.to_string()));
    out.push_field_key(field);
    out.push(" = ?");
    out.bind(sql_key_value(value));
    out.push(" AND json_type(values_json, ?) IN ");
    out.bind(SqlValue::Text(format!("$.\"{field}\"")));
    let kinds = stored_json_types(value);
    out.push(&format!("({})", vec!["?"; kinds.len()].join(", ")));
    for kind in kinds {
        out.bind(SqlValue::Text((*kind).to_string()));
    }
    if let Some(id) = excluding_id {
        out.push(" AND id != ?");
        out.bind(SqlValue::Text(id.to_string()));
    }
    out.push(");");
    Ok(out)
}

pub(crate) fn validate_field_name(field: &str) -> RepoResult<()> {
    if FIELD_NAME_RE.is_match(field) {
        Ok(())
    } else {
        Err(RepoError::InvalidQuery(format!(
            "field name `{field}` must match [A-Za-z0-9_-]+"
        )))
    }
}

fn push_filter(out: &mut SqlQuery, filter: &FieldFilter) -> RepoResult<()> {
    validate_field_name(&filter.field)?;

    if filter.op.takes_list() {
        let Value::Array(items) = &filter.value else {
            return Err(RepoError::InvalidQuery(format!(
                "operator `{}` on `{}` needs an array value",
                filter.op.as_str(),
                filter.field
            )));
        };
        push_list_filter(out, filter, items);
        return Ok(());
    }

    match filter.op {
        FilterOp::ArrayContains => {
            out.push("EXISTS (SELECT 1 FROM json_each(values_json, ?) WHERE ");
            out.bind(SqlValue::Text(format!("$.\"{}\"", filter.field)));
            out.push(ARRAY_ELEMENT_KEY);
            if filter.value.is_null_like() {
                out.push(" IS NULL)");
            } else {
                out.push(" = ?)");
                out.bind(sql_key_value(&filter.value));
            }
        }
        FilterOp::Eq | FilterOp::Ne if filter.value.is_null_like() => {
            out.push_field_key(&filter.field);
            out.push(if filter.op == FilterOp::Eq {
                " IS NULL"
            } else {
                " IS NOT NULL"
            });
        }
        op => {
            let operator = match op {
                FilterOp::Lt => "<",
                FilterOp::Le => "<=",
                FilterOp::Eq => "=",
                FilterOp::Ne => "!=",
                FilterOp::Ge => ">=",
                _ => ">",
            };
            out.push_field_key(&filter.field);
            out.push(&format!(" {operator} ?"));
            out.bind(sql_key_value(&filter.value));
        }
    }
    Ok(())
}

fn push_list_filter(out: &mut SqlQuery, filter: &FieldFilter, items: &[Value]) {
    if items.is_empty() {
        out.push(if filter.op == FilterOp::NotIn {
            "1 = 1"
        } else {
            "0 = 1"
        });
        return;
    }

    match filter.op {
        FilterOp::ArrayContainsAny => {
            out.push("EXISTS (SELECT 1 FROM json_each(values_json, ?) WHERE ");
            out.bind(SqlValue::Text(format!("$.\"{}\"", filter.field)));
            out.push(ARRAY_ELEMENT_KEY);
            out.push(" IN ");
            out.push_placeholders(items);
            out.push(")");
        }
        FilterOp::NotIn => {
            out.push_field_key(&filter.field);
            out.push(" NOT IN ");
            out.push_placeholders(items);
        }
        _ => {
            out.push_field_key(&filter.field);
            out.push(" IN ");
            out.push_placeholders(items);
        }
    }
}

/// Keyset continuation. SQLite sorts NULL first ascending, last descending.
fn push_cursor(out: &mut SqlQuery, cursor: &EntityCursor, order_by: Option<&OrderBy>) {
    let Some(order) = order_by else {
        out.push("id > ?");
        out.bind(SqlValue::Text(cursor.id.clone()));
        return;
    };

    let field = order.field.as_str();
    match (order.direction, cursor.order_value.as_ref()) {
        (OrderDirection::Asc, None) => {
            out.push("((");
            out.push_field_key(field);
            out.push(" IS NULL AND id > ?) OR ");
            out.bind(SqlValue::Text(cursor.id.clone()));
            out.push_field_key(field);
            out.push(" IS NOT NULL)");
        }
        (OrderDirection::Desc, None) => {
            out.push("(");
            out.push_field_key(field);
            out.push(" IS NULL AND id > ?)");
            out.bind(SqlValue::Text(cursor.id.clone()));
        }
        (direction, Some(value)) => {
            let comparison = if direction == OrderDirection::Asc {
                ">"
            } else {
                "<"
            };
            out.push("(");
            out.push_field_key(field);
            out.push(&format!(" {comparison} ? OR ("));
            out.bind(sql_key_value(value));
            out.push_field_key(field);
            out.push(" = ? AND id > ?)");
            out.bind(sql_key_value(value));
            out.bind(SqlValue::Text(cursor.id.clone()));
            if direction == OrderDirection::Desc {
                out.push(" OR ");
                out.push_field_key(field);
                out.push(" IS NULL");
            }
            out.push(")");
        }
    }
}

/// `json_type` names a stored field may carry for `value` to match it.
///
/// Dates and references both persist as tagged objects; their key texts
/// never collide, so `object` is enough to tell them apart from text.
fn stored_json_types(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Undefined | Value::Null => &["null"],
        Value::Bool(_) => &["true", "false"],
        Value::Integer(_) | Value::Float(_) => &["integer", "real"],
        Value::Text(_) => &["text"],
        Value::Date(_) | Value::Reference(_) | Value::Map(_) => &["object"],
        Value::Array(_) => &["array"],
    }
}

/// SQL scalar that compares equal to a stored field key.
pub(crate) fn sql_key_value(value: &Value) -> SqlValue {
    match value {
        Value::Undefined | Value::Null => SqlValue::Null,
        Value::Bool(flag) => SqlValue::Integer(i64::from(*flag)),
        Value::Integer(number) => SqlValue::Integer(*number),
        Value::Float(number) => SqlValue::Real(*number),
        Value::Text(text) => SqlValue::Text(text.clone()),
        Value::Date(date) => SqlValue::Text(date_to_sortable_text(date)),
        Value::Reference(reference) => SqlValue::Text(reference_to_json(reference).to_string()),
        Value::Array(_) | Value::Map(_) => SqlValue::Text(value.to_json().to_string()),
    }
}
