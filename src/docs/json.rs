//! Converts between document values and JSON.
//!
//! This is the bridge used by the JSON file storage, but it is also handy on
//! its own when feeding API payloads into a table.
//!
//! # Examples
//!
//! ```
//! # use callisto::docs::{object_from_json, object_to_json, Value};
//! let json: serde_json::Value = serde_json::from_str(r#"{"name": "Io", "moons": [1, 2]}"#).unwrap();
//! let object = object_from_json(&json).unwrap();
//!
//! assert_eq!(object.get("name").and_then(Value::as_str), Some("Io"));
//! assert_eq!(object_to_json(&object), json);
//! ```
use crate::docs::{Object, Value};
use crate::error::{Error, Result};

/// Transforms a JSON value into a document [Value].
///
/// This conversion is total: every JSON value has a representation. Integers
/// which fit into an i64 become [Value::Int], all other numbers become
/// [Value::Float] (note that a u64 beyond the i64 range therefore loses
/// precision).
pub fn value_from_json(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(value) => Value::Bool(*value),
        serde_json::Value::Number(value) => {
            if let Some(int) = value.as_i64() {
                Value::Int(int)
            } else {
                Value::Float(value.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(value) => Value::Str(value.clone()),
        serde_json::Value::Array(values) => {
            Value::List(values.iter().map(value_from_json).collect())
        }
        serde_json::Value::Object(map) => {
            let mut object = Object::new();
            for (key, value) in map {
                let _ = object.insert(key.clone(), value_from_json(value));
            }
            Value::Object(object)
        }
    }
}

/// Transforms a document [Value] into a JSON value.
///
/// Non-finite floats have no JSON representation and are serialized as null.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(value) => serde_json::Value::Bool(*value),
        Value::Int(value) => serde_json::Value::from(*value),
        Value::Float(value) => serde_json::Number::from_f64(*value)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(value) => serde_json::Value::String(value.clone()),
        Value::List(values) => serde_json::Value::Array(values.iter().map(value_to_json).collect()),
        Value::Object(object) => object_to_json(object),
    }
}

/// Transforms a JSON value into an [Object].
///
/// # Errors
/// Fails with [Error::InvalidDocument] if the given JSON is not an object, as
/// only objects can serve as document bodies.
pub fn object_from_json(json: &serde_json::Value) -> Result<Object> {
    match value_from_json(json) {
        Value::Object(object) => Ok(object),
        other => Err(Error::InvalidDocument(format!(
            "expected an object but found: {}",
            other.type_name()
        ))),
    }
}

/// Transforms an [Object] into a JSON object value, preserving key order.
pub fn object_to_json(object: &Object) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in object {
        let _ = map.insert(key.clone(), value_to_json(value));
    }

    serde_json::Value::Object(map)
}
