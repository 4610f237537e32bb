use std::{collections::BTreeMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// JSON-compatible payload carried by bridge events and chain calls.
///
/// Composite nodes are reference counted so payloads may alias shared
/// substructure. Serialization is plain JSON. Integers that fit `i64` decode
/// as `Int`; any other number (large unsigned, fractional) is kept exactly as
/// it arrived in `Number`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Number(serde_json::Number),
    Text(String),
    List(Arc<Vec<Value>>),
    Record(Arc<BTreeMap<String, Value>>),
}

impl Default for Value {
    fn default() -> Self {
        Self::Null
    }
}

impl Value {
    /// Human-readable kind string used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Number(_) => "number",
            Value::Text(_) => "text",
            Value::List(_) => "list",
            Value::Record(_) => "record",
        }
    }

    pub fn text(value: impl Into<String>) -> Self {
        Value::Text(value.into())
    }

    /// Canonical form of a JSON number: `Int` when it fits, `Number` otherwise.
    pub fn number(number: serde_json::Number) -> Self {
        match number.as_i64() {
            Some(value) => Value::Int(value),
            None => Value::Number(number),
        }
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Value::List(Arc::new(items.into_iter().collect()))
    }

    /// Convenience helper to build a record from field/value pairs.
    pub fn record(fields: impl IntoIterator<Item = (impl Into<String>, Value)>) -> Self {
        let map = fields
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        Value::Record(Arc::new(map))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<serde_json::Number> {
        match self {
            Value::Int(value) => Some((*value).into()),
            Value::Number(number) => Some(number.clone()),
            _ => None,
        }
    }

    /// Field lookup on records; `None` for every other kind.
    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Value::Record(fields) => fields.get(field),
            _ => None,
        }
    }

    /// Compact JSON rendering used in diagnostics.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{self:?}"))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::number(value.into())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_shape_is_plain() {
        let value = Value::record([
            ("n", Value::Int(-3)),
            ("flag", Value::Bool(true)),
            ("items", Value::list([Value::Null, Value::text("x")])),
        ]);
        let json = serde_json::to_value(&value).unwrap();
        assert_eq!(json, json!({"n": -3, "flag": true, "items": [null, "x"]}));

        let back: Value = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn numbers_outside_i64_keep_their_form() {
        assert_eq!(serde_json::from_str::<Value>("7").unwrap(), Value::Int(7));

        let body = json!({"amount": 1.5, "supply": 18446744073709551615u64, "whole": 2.0});
        let value: Value = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(value.get("amount").map(Value::kind), Some("number"));
        assert_eq!(
            value.get("supply").and_then(Value::as_number).and_then(|n| n.as_u64()),
            Some(u64::MAX)
        );
        assert_eq!(value.get("whole").map(Value::kind), Some("number"));
        assert_eq!(serde_json::to_value(&value).unwrap(), body);
        assert_eq!(value.to_string(), r#"{"amount":1.5,"supply":18446744073709551615,"whole":2.0}"#);
    }

    #[test]
    fn number_constructor_is_canonical() {
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(u64::MAX).kind(), "number");
        assert_eq!(Value::number(serde_json::Number::from(-2)), Value::Int(-2));
    }

    #[test]
    fn accessors() {
        let value = Value::record([("port", Value::text("storage"))]);
        assert_eq!(value.get("port").and_then(Value::as_text), Some("storage"));
        assert!(value.get("missing").is_none());
        assert_eq!(Value::Int(4).as_int(), Some(4));
        assert_eq!(Value::default().kind(), "null");
        assert_eq!(value.to_string(), r#"{"port":"storage"}"#);
    }
}
