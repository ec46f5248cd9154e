//! Field coercion from raw source payloads to [`CanonicalRecord`]s
//!
//! Every field of a fetched record goes through the value rules in
//! [`CoercionRule::ORDER`], one field at a time:
//!
//! 1. [`CoercionRule::JoinList`]: `["A", "B"]` becomes `"A, B"`
//! 2. [`CoercionRule::ParseInteger`]: `"42"` becomes `42`, except on `mass`
//! 3. [`CoercionRule::NullSentinel`]: `"unknown"`, `"n/a"`, `"none"` become null
//!
//! The order is part of the contract. A joined multi-element list is never
//! numeric, and a sentinel produced by joining a one-element list is still
//! nulled.
//!
//! Record-level steps follow: transport metadata (`created`, `edited`, `url`)
//! is dropped and the fetch identifier is written as `id`.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::NormalizationError;
use crate::models::{CanonicalRecord, Identifier, RawRecord};

/// Field that stays textual even when it looks numeric
pub const MASS_FIELD: &str = "mass";

/// Field the fetch identifier is injected into
pub const ID_FIELD: &str = "id";

/// Exact, case-sensitive placeholder strings meaning "no value"
pub const SENTINELS: [&str; 3] = ["unknown", "n/a", "none"];

/// Transport-only fields that never reach the destination schema
pub const METADATA_FIELDS: [&str; 3] = ["created", "edited", "url"];

const LIST_SEPARATOR: &str = ", ";

/// A single named value transformation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionRule {
    JoinList,
    ParseInteger,
    NullSentinel,
}

impl CoercionRule {
    /// Application order for every field
    pub const ORDER: [CoercionRule; 3] = [
        CoercionRule::JoinList,
        CoercionRule::ParseInteger,
        CoercionRule::NullSentinel,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CoercionRule::JoinList => "join_list",
            CoercionRule::ParseInteger => "parse_integer",
            CoercionRule::NullSentinel => "null_sentinel",
        }
    }

    /// Apply this rule to one field value; values the rule does not match
    /// pass through untouched
    pub fn apply(self, field: &str, value: Value) -> Result<Value, NormalizationError> {
        match self {
            CoercionRule::JoinList => join_list(field, value),
            CoercionRule::ParseInteger => parse_integer(field, value),
            CoercionRule::NullSentinel => Ok(null_sentinel(value)),
        }
    }
}

fn join_list(field: &str, value: Value) -> Result<Value, NormalizationError> {
    let Value::Array(items) = value else {
        return Ok(value);
    };

    let parts = items
        .into_iter()
        .map(|item| match item {
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            _ => Err(NormalizationError::ListElement {
                field: field.to_string(),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Value::String(parts.join(LIST_SEPARATOR)))
}

fn parse_integer(field: &str, value: Value) -> Result<Value, NormalizationError> {
    match value {
        Value::String(s) if field != MASS_FIELD && is_numeric(&s) => s
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| NormalizationError::IntegerOverflow {
                field: field.to_string(),
                value: s,
            }),
        other => Ok(other),
    }
}

fn null_sentinel(value: Value) -> Value {
    match value {
        Value::String(ref s) if SENTINELS.contains(&s.as_str()) => Value::Null,
        other => other,
    }
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Apply every value rule to one field, in order
pub fn coerce_field(field: &str, value: Value) -> Result<Value, NormalizationError> {
    CoercionRule::ORDER
        .iter()
        .try_fold(value, |value, rule| rule.apply(field, value))
}

/// Run the full rule set over a raw record, producing the normalized field map
///
/// Idempotent: feeding the output back in yields the same map.
pub fn normalize_fields(
    id: Identifier,
    raw: RawRecord,
) -> Result<Map<String, Value>, NormalizationError> {
    let mut fields = Map::with_capacity(raw.len());

    for (field, value) in raw {
        if METADATA_FIELDS.contains(&field.as_str()) {
            continue;
        }
        let value = coerce_field(&field, value)?;
        fields.insert(field, value);
    }

    fields.insert(ID_FIELD.to_string(), Value::from(id));
    Ok(fields)
}

/// Normalize a fetched record into its destination shape
pub fn normalize(id: Identifier, raw: RawRecord) -> Result<CanonicalRecord, NormalizationError> {
    let fields = normalize_fields(id, raw)?;
    into_canonical(id, fields)
}

fn into_canonical(
    id: Identifier,
    mut fields: Map<String, Value>,
) -> Result<CanonicalRecord, NormalizationError> {
    fields.remove(ID_FIELD);

    let record = CanonicalRecord {
        id,
        name: take_text(&mut fields, "name")?
            .ok_or(NormalizationError::MissingField { field: "name" })?,
        height: take_integer(&mut fields, "height")?,
        mass: take_text(&mut fields, "mass")?,
        hair_color: take_text(&mut fields, "hair_color")?,
        skin_color: take_text(&mut fields, "skin_color")?,
        eye_color: take_text(&mut fields, "eye_color")?,
        birth_year: take_text(&mut fields, "birth_year")?,
        gender: take_text(&mut fields, "gender")?,
        homeworld: take_text(&mut fields, "homeworld")?,
        films: take_text(&mut fields, "films")?,
        species: take_text(&mut fields, "species")?,
        vehicles: take_text(&mut fields, "vehicles")?,
        starships: take_text(&mut fields, "starships")?,
    };

    if !fields.is_empty() {
        let ignored: Vec<&str> = fields.keys().map(String::as_str).collect();
        debug!(id, ?ignored, "Ignoring fields outside the destination schema");
    }

    Ok(record)
}

fn take_text(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, NormalizationError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        // A text column may have been turned into a number by ParseInteger
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(NormalizationError::TypeMismatch {
            field,
            expected: "string",
            found: json_kind(&other),
        }),
    }
}

fn take_integer(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<i64>, NormalizationError> {
    match fields.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64()),
        Some(other) => Err(NormalizationError::TypeMismatch {
            field,
            expected: "integer",
            found: json_kind(&other),
        }),
    }
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            _ => panic!("test payload must be an object"),
        }
    }

    fn luke() -> RawRecord {
        raw(json!({
            "name": "Luke Skywalker",
            "height": "172",
            "mass": "77",
            "hair_color": "blond",
            "skin_color": "fair",
            "eye_color": "blue",
            "birth_year": "19BBY",
            "gender": "male",
            "homeworld": "https://swapi.py4e.com/api/planets/1/",
            "films": [
                "https://swapi.py4e.com/api/films/1/",
                "https://swapi.py4e.com/api/films/2/"
            ],
            "species": [],
            "vehicles": ["https://swapi.py4e.com/api/vehicles/14/"],
            "starships": [],
            "created": "2014-12-09T13:50:51.644000Z",
            "edited": "2014-12-20T21:17:56.891000Z",
            "url": "https://swapi.py4e.com/api/people/1/"
        }))
    }

    #[test]
    fn test_join_list_rule() {
        let value = CoercionRule::JoinList
            .apply("films", json!(["A", "B"]))
            .unwrap();
        assert_eq!(value, json!("A, B"));
    }

    #[test]
    fn test_join_list_rejects_nested_values() {
        let err = CoercionRule::JoinList
            .apply("films", json!(["A", {"title": "B"}]))
            .unwrap_err();
        assert_eq!(
            err,
            NormalizationError::ListElement {
                field: "films".to_string()
            }
        );
    }

    #[test]
    fn test_parse_integer_rule() {
        assert_eq!(
            CoercionRule::ParseInteger.apply("height", json!("42")).unwrap(),
            json!(42)
        );
        assert_eq!(
            CoercionRule::ParseInteger.apply("mass", json!("42")).unwrap(),
            json!("42")
        );
        assert_eq!(
            CoercionRule::ParseInteger.apply("mass", json!("1,358")).unwrap(),
            json!("1,358")
        );
        assert_eq!(
            CoercionRule::ParseInteger.apply("height", json!("-3")).unwrap(),
            json!("-3")
        );
        assert_eq!(
            CoercionRule::ParseInteger.apply("height", json!("")).unwrap(),
            json!("")
        );
    }

    #[test]
    fn test_parse_integer_overflow_is_an_error() {
        let err = CoercionRule::ParseInteger
            .apply("height", json!("99999999999999999999"))
            .unwrap_err();
        assert!(matches!(err, NormalizationError::IntegerOverflow { .. }));
    }

    #[test]
    fn test_null_sentinel_rule_is_exact_match() {
        for sentinel in SENTINELS {
            assert_eq!(
                CoercionRule::NullSentinel.apply("gender", json!(sentinel)).unwrap(),
                Value::Null
            );
        }
        for kept in ["Unknown", " n/a", "NONE", "none "] {
            assert_eq!(
                CoercionRule::NullSentinel.apply("gender", json!(kept)).unwrap(),
                json!(kept)
            );
        }
    }

    #[test]
    fn test_sentinel_after_join() {
        assert_eq!(coerce_field("species", json!(["unknown"])).unwrap(), Value::Null);
    }

    #[test]
    fn test_joined_digits_are_not_parsed() {
        assert_eq!(coerce_field("films", json!(["1", "2"])).unwrap(), json!("1, 2"));
    }

    #[test]
    fn test_normalize_full_record() {
        let record = normalize(1, luke()).unwrap();

        assert_eq!(record.id, 1);
        assert_eq!(record.name, "Luke Skywalker");
        assert_eq!(record.height, Some(172));
        assert_eq!(record.mass.as_deref(), Some("77"));
        assert_eq!(
            record.films.as_deref(),
            Some("https://swapi.py4e.com/api/films/1/, https://swapi.py4e.com/api/films/2/")
        );
        assert_eq!(record.species.as_deref(), Some(""));
        assert_eq!(record.birth_year.as_deref(), Some("19BBY"));
    }

    #[test]
    fn test_metadata_is_dropped_and_id_injected() {
        let mut payload = luke();
        payload.insert("id".to_string(), json!(999));

        let fields = normalize_fields(4, payload).unwrap();

        for field in METADATA_FIELDS {
            assert!(!fields.contains_key(field), "{field} should be dropped");
        }
        assert_eq!(fields.get("id"), Some(&json!(4)));
    }

    #[test]
    fn test_sentinels_become_null_columns() {
        let payload = raw(json!({
            "name": "R2-D2",
            "height": "unknown",
            "mass": "n/a",
            "hair_color": "none",
            "gender": "n/a"
        }));

        let record = normalize(3, payload).unwrap();
        assert_eq!(record.height, None);
        assert_eq!(record.mass, None);
        assert_eq!(record.hair_color, None);
        assert_eq!(record.gender, None);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        let once = normalize_fields(1, luke()).unwrap();
        let twice = normalize_fields(1, once.clone()).unwrap();
        assert_eq!(once, twice);
        assert_eq!(
            into_canonical(1, once).unwrap(),
            into_canonical(1, twice).unwrap()
        );
    }

    #[test]
    fn test_missing_name_is_rejected() {
        let err = normalize(5, raw(json!({"height": "100"}))).unwrap_err();
        assert_eq!(err, NormalizationError::MissingField { field: "name" });

        let err = normalize(5, raw(json!({"name": "unknown"}))).unwrap_err();
        assert_eq!(err, NormalizationError::MissingField { field: "name" });
    }

    #[test]
    fn test_non_integer_height_is_rejected() {
        let err = normalize(6, raw(json!({"name": "Jabba", "height": "1,75"}))).unwrap_err();
        assert_eq!(
            err,
            NormalizationError::TypeMismatch {
                field: "height",
                expected: "integer",
                found: "string"
            }
        );
    }

    #[test]
    fn test_unknown_fields_are_ignored() {
        let record = normalize(8, raw(json!({"name": "R5-D4", "affiliation": "rebels"}))).unwrap();
        assert_eq!(record, CanonicalRecord::new(8, "R5-D4"));
    }

    #[test]
    fn test_rule_names() {
        let names: Vec<&str> = CoercionRule::ORDER.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["join_list", "parse_integer", "null_sentinel"]);
    }
}
