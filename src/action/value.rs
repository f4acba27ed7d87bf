use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The kind tag carried by every [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("cannot read '{text}' as {kind}")]
    Parse { kind: ValueKind, text: String },
}

/// A type-erased value passed to actions and rules.
///
/// Wraps a JSON value so that it crosses the plugin boundary, the
/// interpreter boundary and the front ends in the same shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(serde_json::Value);

impl Value {
    pub fn new(inner: impl Into<serde_json::Value>) -> Self {
        Value(inner.into())
    }

    pub fn null() -> Self {
        Value(serde_json::Value::Null)
    }

    pub fn kind(&self) -> ValueKind {
        match &self.0 {
            serde_json::Value::Null => ValueKind::Null,
            serde_json::Value::Bool(_) => ValueKind::Bool,
            serde_json::Value::Number(_) => ValueKind::Number,
            serde_json::Value::String(_) => ValueKind::String,
            serde_json::Value::Array(_) => ValueKind::Array,
            serde_json::Value::Object(_) => ValueKind::Object,
        }
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// The native form.
    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub fn into_json(self) -> serde_json::Value {
        self.0
    }

    /// Rebuilds a value from its string form; the inverse of `to_string`
    /// for a known kind.
    pub fn parse(kind: ValueKind, text: &str) -> Result<Value, ValueError> {
        let err = || ValueError::Parse {
            kind,
            text: text.to_string(),
        };
        if kind == ValueKind::String {
            return Ok(Value::from(text));
        }
        let inner: serde_json::Value = serde_json::from_str(text).map_err(|_| err())?;
        let value = Value(inner);
        if value.kind() == kind {
            Ok(value)
        } else {
            Err(err())
        }
    }
}

/// Strings print raw, everything else prints as JSON.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            serde_json::Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value(v)
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        v.0
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value(serde_json::Value::String(v.to_string()))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value(serde_json::Value::String(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value(serde_json::Value::Bool(v))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_follows_inner_value() {
        assert_eq!(Value::null().kind(), ValueKind::Null);
        assert_eq!(Value::from(true).kind(), ValueKind::Bool);
        assert_eq!(Value::from(3_i64).kind(), ValueKind::Number);
        assert_eq!(Value::from("x").kind(), ValueKind::String);
        assert_eq!(Value::new(json!([1, 2])).kind(), ValueKind::Array);
        assert_eq!(Value::new(json!({"a": 1})).kind(), ValueKind::Object);
    }

    #[test]
    fn test_string_form_round_trips() {
        let nested = Value::new(json!({"disk": "/dev/sda", "usage": [0.5, 0.75], "ok": true}));
        let restored = Value::parse(nested.kind(), &nested.to_string()).unwrap();
        assert_eq!(restored, nested);

        // strings are not quoted in their string form
        let plain = Value::from("42");
        assert_eq!(plain.to_string(), "42");
        assert_eq!(Value::parse(ValueKind::String, "42").unwrap(), plain);
    }

    #[test]
    fn test_parse_rejects_kind_mismatch() {
        let err = Value::parse(ValueKind::Number, "[1]").unwrap_err();
        assert_eq!(
            err,
            ValueError::Parse {
                kind: ValueKind::Number,
                text: "[1]".to_string()
            }
        );
    }
}
