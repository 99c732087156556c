//! Dynamically shaped data values fed into a fill.
//!
//! Report data arrives as string-keyed mappings and ordered sequences of
//! scalars (typically decoded from JSON). [`Value`] is the explicit tagged
//! union the evaluator works on; every comparison, arithmetic and
//! concatenation site coerces through the rules in `eval.rs`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::format::format_value;

/// A data value: a scalar, a container, or a constructed hyperlink.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(BTreeMap<String, Value>),
    Binary(Vec<u8>),
    Hyperlink { url: String, label: String },
}

impl Value {
    /// Build a mapping from `(key, value)` pairs.
    pub fn mapping<K, I>(entries: I) -> Value
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Mapping(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the value's kind, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
            Value::Binary(_) => "binary",
            Value::Hyperlink { .. } => "hyperlink",
        }
    }

    /// Look up a key when this value is a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Mapping(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Text shown when the value is embedded in a larger string.
    pub fn to_display(&self) -> String {
        format_value(self)
    }

    /// Total order used for sorting: kinds rank Null < Bool < Number < String
    /// < everything else, then values compare within their kind.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(_) => 1,
                Value::Number(_) => 2,
                Value::String(_) => 3,
                Value::Hyperlink { .. } => 4,
                Value::Sequence(_) => 5,
                Value::Mapping(_) => 6,
                Value::Binary(_) => 7,
            }
        }

        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Number(a), Value::Number(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Hyperlink { label: a, .. }, Value::Hyperlink { label: b, .. }) => a.cmp(b),
            (Value::Sequence(a), Value::Sequence(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.sort_cmp(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => rank(self).cmp(&rank(other)),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => n.as_f64().map(Value::Number).unwrap_or(Value::Null),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Number(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Number(value as f64)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Sequence(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_shapes() {
        let value = Value::from(json!({
            "name": "Alice",
            "salary": 5000,
            "tags": ["a", true, null],
        }));
        assert_eq!(value.get("name"), Some(&Value::from("Alice")));
        assert_eq!(value.get("salary"), Some(&Value::Number(5000.0)));
        let tags = value.get("tags").and_then(Value::as_sequence).unwrap();
        assert_eq!(tags, &[Value::from("a"), Value::Bool(true), Value::Null]);
    }

    #[test]
    fn test_sort_cmp_ranks_kinds_before_values() {
        let mut values = vec![
            Value::from("b"),
            Value::Number(2.0),
            Value::Null,
            Value::from("a"),
            Value::Number(-1.0),
            Value::Bool(true),
        ];
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::Bool(true),
                Value::Number(-1.0),
                Value::Number(2.0),
                Value::from("a"),
                Value::from("b"),
            ]
        );
    }

    #[test]
    fn test_mapping_builder() {
        let value = Value::mapping([("x", Value::from(1i64))]);
        assert_eq!(value.kind(), "mapping");
        assert_eq!(value.get("x").and_then(Value::as_f64), Some(1.0));
        assert!(value.get("y").is_none());
    }
}
