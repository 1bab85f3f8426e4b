//! Loosely-typed values at the ingestion boundary.
//!
//! Records arrive as `column name -> Value` maps (typically decoded from a
//! JSON array of objects). Columns store strictly typed data; the
//! conversion happens once, at insert or update time.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A single loosely-typed record: column name -> value.
pub type Record = HashMap<String, Value>;

/// Tagged variant for values crossing the public API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent. Inserting `Null` leaves the column unset; writing it
    /// through a cursor clears the row's value.
    Null,
    Bool(bool),
    Float64(f64),
    String(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Human-readable tag, used in `TypeMismatch` errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq<str> for Value {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == Some(other)
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == Some(*other)
    }
}

impl PartialEq<f64> for Value {
    fn eq(&self, other: &f64) -> bool {
        self.as_f64() == Some(*other)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Float64(v as f64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Float64(v as f64)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    /// JSON numbers become `Float64` regardless of integer/float encoding.
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map_or(Value::Null, Value::Float64),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Map(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

/// Convert a JSON object into a [`Record`]. Any other JSON shape is a
/// `TypeMismatch`.
pub fn record_from_json(json: &serde_json::Value) -> Result<Record> {
    match json {
        serde_json::Value::Object(map) => Ok(map
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(v.clone())))
            .collect()),
        other => Err(Error::TypeMismatch {
            column: String::new(),
            expected: "object",
            found: json_type_name(other),
        }),
    }
}

/// Decode a JSON array of objects into records.
pub fn records_from_json_str(s: &str) -> Result<Vec<Record>> {
    let parsed: Vec<serde_json::Value> = serde_json::from_str(s)?;
    parsed.iter().map(record_from_json).collect()
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_numbers_become_float() {
        assert_eq!(Value::from(json!(25)), Value::Float64(25.0));
        assert_eq!(Value::from(json!(2.5)), Value::Float64(2.5));
    }

    #[test]
    fn test_json_nested() {
        let v = Value::from(json!({"x": [1, "a", null]}));
        let Value::Map(map) = v else {
            panic!("expected map");
        };
        assert_eq!(
            map["x"],
            Value::List(vec![
                Value::Float64(1.0),
                Value::String("a".into()),
                Value::Null
            ])
        );
    }

    #[test]
    fn test_record_from_json() {
        let rec = record_from_json(&json!({"race": "human", "age": 25})).unwrap();
        assert_eq!(rec["race"], "human");
        assert_eq!(rec["age"], 25.0);
    }

    #[test]
    fn test_record_from_json_rejects_non_object() {
        let err = record_from_json(&json!([1, 2])).unwrap_err();
        assert_eq!(err.code(), "TYPE_MISMATCH");
    }

    #[test]
    fn test_records_from_json_str() {
        let recs = records_from_json_str(r#"[{"a": 1}, {"b": "x"}]"#).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[1]["b"], "x");
        assert!(records_from_json_str("not json").is_err());
    }

    #[test]
    fn test_option_into_value() {
        assert_eq!(Value::from(None::<f64>), Value::Null);
        assert_eq!(Value::from(Some("a")), Value::String("a".into()));
    }
}
