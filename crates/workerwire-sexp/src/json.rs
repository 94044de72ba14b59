//! Bridge between serde data and [`Value`].
//!
//! JSON shapes map onto values as follows: `null`/`false` → `nil`, `true` →
//! `t`, numbers → `Int`/`Float`, strings → `Str`, arrays → `List`, objects →
//! a list of `(KEY VALUE)` pairs with string keys, in key order.

use serde::Serialize;

use crate::value::Value;

/// Convert any serializable value.
///
/// Fails when serde cannot represent the input (for example a map with
/// non-string keys).
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, serde_json::Error> {
    serde_json::to_value(value).map(from_json)
}

/// Convert a parsed JSON document.
pub fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null | serde_json::Value::Bool(false) => Value::symbol("nil"),
        serde_json::Value::Bool(true) => Value::symbol("t"),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => Value::List(
            map.into_iter()
                .map(|(key, value)| Value::List(vec![Value::Str(key), from_json(value)]))
                .collect(),
        ),
    }
}

impl Value {
    /// JSON rendering for display. Symbols become strings, non-finite floats `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Int(n) => serde_json::Value::from(*n),
            Value::Float(x) => serde_json::Number::from_f64(*x)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) | Value::Symbol(s) => serde_json::Value::String(s.clone()),
            Value::List(items) | Value::Vector(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
        }
    }
}
