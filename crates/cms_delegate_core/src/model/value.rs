//! Tagged value model shared by the CMS side and the store side.
//!
//! # Responsibility
//! - Represent dynamic entity field values as one closed enum.
//! - Define the JSON shape used to persist values in `entities.values_json`.
//!
//! # Invariants
//! - `Value::Undefined` exists only on the CMS side and is never persisted.
//! - Dates persist as `{"__date": "<RFC 3339, nanosecond, Z>"}` so the text
//!   form sorts chronologically.
//! - References persist as `{"__ref": {"database_id", "id", "path"}}`.
//! - Only values accepted by `Value::check_storable` are written; anything
//!   else would not decode back to itself.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

const DATE_TAG: &str = "__date";
const REFERENCE_TAG: &str = "__ref";
const MAX_STORABLE_YEAR: i32 = 9999;

/// Field mapping of one entity.
pub type EntityValues = BTreeMap<String, Value>;

/// Pointer to another entity by collection path and id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    pub path: String,
    pub id: String,
    pub database_id: Option<String>,
}

impl EntityReference {
    pub fn new(path: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            id: id.into(),
            database_id: None,
        }
    }

    /// Full `path/id` location of the referenced entity.
    pub fn path_with_id(&self) -> String {
        format!("{}/{}", self.path, self.id)
    }
}

/// Dynamic field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// "No value" on the CMS side. Rewritten to `Null` before any write.
    Undefined,
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Date(DateTime<Utc>),
    Array(Vec<Value>),
    Map(BTreeMap<String, Value>),
    Reference(EntityReference),
}

/// Decoding error for persisted value JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    InvalidDate(String),
    InvalidReference(String),
    InvalidJson(String),
    /// The value has no lossless persisted form; `field` is a dotted path.
    NotStorable { field: String, reason: &'static str },
}

impl Display for ValueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidDate(raw) => write!(f, "invalid persisted date `{raw}`"),
            Self::InvalidReference(message) => write!(f, "invalid persisted reference: {message}"),
            Self::InvalidJson(message) => write!(f, "invalid value json: {message}"),
            Self::NotStorable { field, reason } => {
                write!(f, "field `{field}` cannot be stored: {reason}")
            }
        }
    }
}

impl Error for ValueError {}

impl Value {
    pub fn is_null_like(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Date(value) => Some(*value),
            _ => None,
        }
    }

    /// Rejects values whose persisted form would decode differently:
    /// non-finite floats, dates outside years 0..=9999, and maps whose only
    /// key is a reserved tag. `field` names this value in the error.
    pub fn check_storable(&self, field: &str) -> Result<(), ValueError> {
        let not_storable = |reason| ValueError::NotStorable {
            field: field.to_string(),
            reason,
        };
        match self {
            Self::Float(value) if !value.is_finite() => {
                Err(not_storable("float is NaN or infinite"))
            }
            Self::Date(value) if !(0..=MAX_STORABLE_YEAR).contains(&value.year()) => {
                Err(not_storable("date year outside 0000-9999"))
            }
            Self::Array(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(index, item)| item.check_storable(&format!("{field}.{index}"))),
            Self::Map(fields) => {
                if fields.len() == 1
                    && (fields.contains_key(DATE_TAG) || fields.contains_key(REFERENCE_TAG))
                {
                    return Err(not_storable("map uses a reserved `__date`/`__ref` key"));
                }
                fields
                    .iter()
                    .try_for_each(|(key, value)| value.check_storable(&format!("{field}.{key}")))
            }
            _ => Ok(()),
        }
    }

    /// Encodes this value into its persisted JSON shape.
    ///
    /// `Undefined` encodes as JSON `null`; callers run inbound translation
    /// first so it never reaches storage.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Undefined | Self::Null => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Integer(value) => JsonValue::Number(Number::from(*value)),
            Self::Float(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Text(value) => JsonValue::String(value.clone()),
            Self::Date(value) => {
                let mut object = JsonMap::new();
                object.insert(
                    DATE_TAG.to_string(),
                    JsonValue::String(date_to_sortable_text(value)),
                );
                JsonValue::Object(object)
            }
            Self::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Self::Map(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Reference(reference) => {
                let mut object = JsonMap::new();
                object.insert(REFERENCE_TAG.to_string(), reference_to_json(reference));
                JsonValue::Object(object)
            }
        }
    }

    /// Decodes a persisted JSON value.
    pub fn from_json(json: &JsonValue) -> Result<Self, ValueError> {
        match json {
            JsonValue::Null => Ok(Self::Null),
            JsonValue::Bool(value) => Ok(Self::Bool(*value)),
            JsonValue::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Ok(Self::Integer(value))
                } else {
                    number
                        .as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| ValueError::InvalidJson(format!("number `{number}`")))
                }
            }
            JsonValue::String(value) => Ok(Self::Text(value.clone())),
            JsonValue::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Array),
            JsonValue::Object(object) => decode_object(object),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = JsonValue::deserialize(deserializer)?;
        Value::from_json(&json).map_err(D::Error::custom)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Integer(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Date(value)
    }
}

impl From<EntityReference> for Value {
    fn from(value: EntityReference) -> Self {
        Self::Reference(value)
    }
}

/// Runs `Value::check_storable` over a whole field mapping.
///
/// The mapping itself persists as one JSON object, so it may not take the
/// reserved single-tag shape either.
pub fn check_storable_fields(values: &EntityValues) -> Result<(), ValueError> {
    if values.len() == 1
        && (values.contains_key(DATE_TAG) || values.contains_key(REFERENCE_TAG))
    {
        return Err(ValueError::NotStorable {
            field: values.keys().cloned().collect(),
            reason: "entity values use a reserved `__date`/`__ref` key",
        });
    }
    values
        .iter()
        .try_for_each(|(field, value)| value.check_storable(field))
}

/// Fixed-width RFC 3339 text. Lexicographic order equals time order for the
/// storable year range.
pub fn date_to_sortable_text(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Compact JSON text of a reference, as stored under the `__ref` tag.
pub fn reference_to_json(reference: &EntityReference) -> JsonValue {
    let mut object = JsonMap::new();
    object.insert(
        "database_id".to_string(),
        reference
            .database_id
            .clone()
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
    );
    object.insert("id".to_string(), JsonValue::String(reference.id.clone()));
    object.insert("path".to_string(), JsonValue::String(reference.path.clone()));
    JsonValue::Object(object)
}

fn decode_object(object: &JsonMap<String, JsonValue>) -> Result<Value, ValueError> {
    if object.len() == 1 {
        if let Some(raw) = object.get(DATE_TAG) {
            let text = raw
                .as_str()
                .ok_or_else(|| ValueError::InvalidDate(raw.to_string()))?;
            let parsed = DateTime::parse_from_rfc3339(text)
                .map_err(|_| ValueError::InvalidDate(text.to_string()))?;
            return Ok(Value::Date(parsed.with_timezone(&Utc)));
        }
        if let Some(raw) = object.get(REFERENCE_TAG) {
            let reference = serde_json::from_value::<EntityReference>(raw.clone())
                .map_err(|err| ValueError::InvalidReference(err.to_string()))?;
            return Ok(Value::Reference(reference));
        }
    }

    let mut fields = BTreeMap::new();
    for (key, value) in object {
        fields.insert(key.clone(), Value::from_json(value)?);
    }
    Ok(Value::Map(fields))
}

#[cfg(test)]
mod tests {
    use super::{date_to_sortable_text, EntityReference, Value, ValueError};
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    #[test]
    fn date_persists_as_tagged_object_and_decodes_back() {
        let date = Utc.with_ymd_and_hms(2024, 3, 9, 14, 30, 5).unwrap();
        let json = Value::Date(date).to_json();
        assert_eq!(json["__date"], "2024-03-09T14:30:05.000000000Z");
        assert_eq!(Value::from_json(&json).unwrap(), Value::Date(date));
    }

    #[test]
    fn reference_decodes_from_tagged_object() {
        let mut reference = EntityReference::new("authors", "a-1");
        reference.database_id = Some("tenant".to_string());
        let json = Value::Reference(reference.clone()).to_json();
        assert_eq!(
            Value::from_json(&json).unwrap(),
            Value::Reference(reference)
        );
    }

    #[test]
    fn integer_and_float_stay_distinct() {
        let json = serde_json::json!({"a": 3, "b": 1.5});
        let Value::Map(fields) = Value::from_json(&json).unwrap() else {
            panic!("object should decode into a map");
        };
        assert_eq!(fields["a"], Value::Integer(3));
        assert_eq!(fields["b"], Value::Float(1.5));
    }

    #[test]
    fn object_with_extra_keys_is_a_plain_map() {
        let json = serde_json::json!({"__date": "x", "other": 1});
        let mut expected = BTreeMap::new();
        expected.insert("__date".to_string(), Value::Text("x".to_string()));
        expected.insert("other".to_string(), Value::Integer(1));
        assert_eq!(Value::from_json(&json).unwrap(), Value::Map(expected));
    }

    #[test]
    fn malformed_date_is_rejected() {
        let json = serde_json::json!({"__date": "yesterday"});
        assert!(Value::from_json(&json).is_err());
    }

    #[test]
    fn sortable_text_orders_chronologically() {
        let early = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(date_to_sortable_text(&early) < date_to_sortable_text(&late));
    }

    #[test]
    fn storable_check_rejects_values_that_do_not_decode_back() {
        let reserved = Value::Map(BTreeMap::from([(
            "__date".to_string(),
            Value::from("soon"),
        )]));
        let nested = Value::Array(vec![Value::Map(BTreeMap::from([(
            "score".to_string(),
            Value::Float(f64::NAN),
        )]))]);
        let far_future = Value::Date(Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap());

        assert!(matches!(
            reserved.check_storable("meta"),
            Err(ValueError::NotStorable { field, .. }) if field == "meta"
        ));
        assert!(matches!(
            nested.check_storable("rows"),
            Err(ValueError::NotStorable { field, .. }) if field == "rows.0.score"
        ));
        assert!(far_future.check_storable("when").is_err());
        assert!(Value::Float(f64::INFINITY).check_storable("x").is_err());
    }

    #[test]
    fn storable_check_accepts_ordinary_values() {
        let tagged_with_siblings = Value::Map(BTreeMap::from([
            ("__ref".to_string(), Value::from("x")),
            ("other".to_string(), Value::Integer(1)),
        ]));
        let year_zero = Value::Date(Utc.with_ymd_and_hms(0, 1, 1, 0, 0, 0).unwrap());

        assert_eq!(tagged_with_siblings.check_storable("m"), Ok(()));
        assert_eq!(year_zero.check_storable("d"), Ok(()));
        assert_eq!(Value::Float(-0.5).check_storable("f"), Ok(()));
        let json = year_zero.to_json();
        assert_eq!(Value::from_json(&json).unwrap(), year_zero);
    }
}
