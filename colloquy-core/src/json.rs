//! Bridging opaque JSON payloads and `yrs::Any`.
//!
//! Thread and comment `data`/`content` are caller-defined JSON. They are
//! stored as plain `Any` values so that other clients (including non-Rust
//! ones) read them back as ordinary JSON.

use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use yrs::{Any, Out};

/// Largest integer an `f64` represents exactly.
const MAX_SAFE_INTEGER: i64 = (1 << 53) - 1;

/// Convert a JSON value into an `Any`.
///
/// Integers within the safe range become `Any::Number` so JavaScript
/// readers see plain numbers; larger ones become `Any::BigInt`.
pub fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) if i.abs() > MAX_SAFE_INTEGER => Any::BigInt(i),
            _ => Any::Number(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Any::String(s.as_str().into()),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(items.into())
        }
        Value::Object(fields) => {
            let map: HashMap<String, Any> = fields
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect();
            Any::Map(Arc::new(map))
        }
    }
}

/// Convert an `Any` back into JSON.
pub fn any_to_json(any: &Any) -> Value {
    match any {
        Any::Null | Any::Undefined => Value::Null,
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(f) => number_to_json(*f),
        Any::BigInt(i) => Value::Number(Number::from(*i)),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(fields) => {
            let mut map = Map::with_capacity(fields.len());
            for (k, v) in fields.iter() {
                map.insert(k.clone(), any_to_json(v));
            }
            Value::Object(map)
        }
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Convert a document value into JSON. Shared types are not payloads and
/// read as `null`.
pub fn out_to_json(out: &Out) -> Value {
    match out {
        Out::Any(any) => any_to_json(any),
        _ => Value::Null,
    }
}

fn number_to_json(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() <= MAX_SAFE_INTEGER as f64 {
        return Value::Number(Number::from(f as i64));
    }
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Read an unsigned integer out of a numeric `Any`.
pub fn any_as_u64(any: &Any) -> Option<u64> {
    match any {
        Any::Number(f) if *f >= 0.0 && f.fract() == 0.0 => Some(*f as u64),
        Any::BigInt(i) if *i >= 0 => Some(*i as u64),
        Any::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// JavaScript-style truthiness, used for flags written as `0` / `1`.
pub fn any_is_truthy(any: &Any) -> bool {
    match any {
        Any::Null | Any::Undefined => false,
        Any::Bool(b) => *b,
        Any::Number(f) => *f != 0.0 && !f.is_nan(),
        Any::BigInt(i) => *i != 0,
        Any::String(s) => !s.is_empty(),
        _ => true,
    }
}
