//! Value-model translation between the CMS and the store.
//!
//! # Responsibility
//! - Outbound (`delegate_to_cms_model`): structural identity.
//! - Inbound (`cms_to_delegate_model`): rewrite "no value" to `Null` and prune
//!   null-valued fields from maps.
//! - Day-granularity date normalization for filtering/grouping.
//!
//! # Invariants
//! - Inbound output never contains `Value::Undefined`.
//! - A map produced by inbound translation never holds a `Null` entry.
//! - A top-level `Null` stays `Null`.

use crate::model::value::{EntityValues, Value};
use chrono::{DateTime, Local, LocalResult, NaiveTime, TimeZone, Utc};

/// Translates a store value into the CMS representation.
pub fn delegate_to_cms_model(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(delegate_to_cms_model).collect()),
        Value::Map(fields) => Value::Map(
            fields
                .iter()
                .map(|(key, value)| (key.clone(), delegate_to_cms_model(value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Translates a CMS value into the store representation.
pub fn cms_to_delegate_model(value: &Value) -> Value {
    match value {
        Value::Undefined => Value::Null,
        Value::Array(items) => Value::Array(items.iter().map(cms_to_delegate_model).collect()),
        Value::Map(fields) => Value::Map(cms_values_to_delegate(fields)),
        other => other.clone(),
    }
}

/// Inbound translation of a whole field mapping, pruning null fields.
pub fn cms_values_to_delegate(values: &EntityValues) -> EntityValues {
    values
        .iter()
        .filter_map(|(key, value)| match cms_to_delegate_model(value) {
            Value::Null => None,
            converted => Some((key.clone(), converted)),
        })
        .collect()
}

/// Outbound translation of a whole field mapping.
pub fn delegate_values_to_cms(values: &EntityValues) -> EntityValues {
    values
        .iter()
        .map(|(key, value)| (key.clone(), delegate_to_cms_model(value)))
        .collect()
}

/// Returns the local-day midnight of a date value; other inputs unchanged.
///
/// When local midnight does not exist (DST gap) the earliest valid instant of
/// that local day is used.
pub fn set_date_to_midnight(value: &Value) -> Value {
    match value {
        Value::Date(date) => Value::Date(local_midnight(date)),
        other => other.clone(),
    }
}

fn local_midnight(date: &DateTime<Utc>) -> DateTime<Utc> {
    let local_day = date.with_timezone(&Local).date_naive();
    let midnight = local_day.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&midnight) {
        LocalResult::Single(value) => value.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => first_valid_local_instant(local_day, date),
    }
}

fn first_valid_local_instant(day: chrono::NaiveDate, fallback: &DateTime<Utc>) -> DateTime<Utc> {
    (1..=24 * 60)
        .filter_map(|minutes| {
            let time = NaiveTime::MIN + chrono::Duration::minutes(minutes);
            Local.from_local_datetime(&day.and_time(time)).earliest()
        })
        .next()
        .map(|value| value.with_timezone(&Utc))
        .unwrap_or(*fallback)
}

#[cfg(test)]
mod tests {
    use super::{
        cms_to_delegate_model, cms_values_to_delegate, delegate_to_cms_model,
        set_date_to_midnight,
    };
    use crate::model::value::Value;
    use chrono::{Local, TimeZone, Timelike, Utc};
    use std::collections::BTreeMap;

    fn map(entries: &[(&str, Value)]) -> Value {
        Value::Map(
            entries
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
        )
    }

    #[test]
    fn undefined_becomes_null() {
        assert_eq!(cms_to_delegate_model(&Value::Undefined), Value::Null);
    }

    #[test]
    fn top_level_null_is_preserved() {
        assert_eq!(cms_to_delegate_model(&Value::Null), Value::Null);
    }

    #[test]
    fn null_fields_are_pruned_from_maps() {
        let input = map(&[("a", Value::Undefined), ("b", Value::Integer(1))]);
        assert_eq!(
            cms_to_delegate_model(&input),
            map(&[("b", Value::Integer(1))])
        );
    }

    #[test]
    fn pruning_recurses_through_nested_maps_and_arrays() {
        let input = map(&[(
            "outer",
            Value::Array(vec![
                map(&[("x", Value::Null), ("y", Value::from("keep"))]),
                Value::Undefined,
            ]),
        )]);
        let expected = map(&[(
            "outer",
            Value::Array(vec![map(&[("y", Value::from("keep"))]), Value::Null]),
        )]);
        assert_eq!(cms_to_delegate_model(&input), expected);
    }

    #[test]
    fn field_mapping_drops_null_entries() {
        let mut values = BTreeMap::new();
        values.insert("gone".to_string(), Value::Null);
        values.insert("kept".to_string(), Value::Bool(false));
        let converted = cms_values_to_delegate(&values);
        assert_eq!(converted.len(), 1);
        assert_eq!(converted["kept"], Value::Bool(false));
    }

    #[test]
    fn outbound_is_identity() {
        let date = Utc.with_ymd_and_hms(2022, 5, 1, 8, 0, 0).unwrap();
        let input = map(&[
            ("when", Value::Date(date)),
            ("tags", Value::Array(vec![Value::from("a"), Value::Null])),
        ]);
        assert_eq!(delegate_to_cms_model(&input), input);
    }

    #[test]
    fn midnight_zeroes_time_and_keeps_local_day() {
        let date = Utc.with_ymd_and_hms(2024, 7, 15, 13, 45, 12).unwrap()
            + chrono::Duration::milliseconds(250);
        let Value::Date(result) = set_date_to_midnight(&Value::Date(date)) else {
            panic!("date input must yield a date");
        };
        let local = result.with_timezone(&Local);
        assert_eq!(local.date_naive(), date.with_timezone(&Local).date_naive());
        assert_eq!(local.hour(), 0);
        assert_eq!(local.minute(), 0);
        assert_eq!(local.second(), 0);
        assert_eq!(local.nanosecond(), 0);
    }

    #[test]
    fn midnight_is_idempotent() {
        let date = Value::Date(Utc.with_ymd_and_hms(2021, 1, 2, 23, 59, 59).unwrap());
        let once = set_date_to_midnight(&date);
        assert_eq!(set_date_to_midnight(&once), once);
    }

    #[test]
    fn midnight_passes_non_dates_through() {
        assert_eq!(set_date_to_midnight(&Value::Undefined), Value::Undefined);
        assert_eq!(set_date_to_midnight(&Value::Null), Value::Null);
        assert_eq!(
            set_date_to_midnight(&Value::from("not a date")),
            Value::from("not a date")
        );
    }
}
