//! Provides ready-made [mutations](Mutation) for common document updates.
//!
//! All operations address a top-level field and are deliberately forgiving:
//! a missing field or an unsuitable value type turns the operation into a
//! no-op for that document instead of failing the whole update. Note that
//! [add] concatenates when both sides are strings.
//!
//! # Example
//!
//! ```
//! use callisto::db::Database;
//! use callisto::ops;
//! use callisto::query::field;
//! use callisto::object;
//!
//! let db = Database::memory().unwrap();
//! let table = db.table("counters").unwrap();
//! table.insert(object! { "name" => "visits", "value" => 41 }).unwrap();
//!
//! table
//!     .update(ops::increment("value"), Some(&field("name").equals("visits")), None)
//!     .unwrap();
//!
//! let counter = table.get(Some(&field("name").equals("visits")), None).unwrap().unwrap();
//! assert_eq!(counter.get("value").unwrap().as_int(), Some(42));
//! ```
use crate::db::Mutation;
use crate::docs::{Object, Value};

/// Stores the given value in the given field, overwriting any previous value.
pub fn set(field: impl Into<String>, value: impl Into<Value>) -> Mutation {
    let field = field.into();
    let value = value.into();

    Mutation::transform(move |fields| store(fields, &field, value.clone()))
}

/// Removes the given field. Documents without the field are left alone.
pub fn delete(field: impl Into<String>) -> Mutation {
    let field = field.into();

    Mutation::transform(move |fields| {
        let _ = fields.remove(&field);
    })
}

/// Adds the given value to the given field.
///
/// Two ints stay an int, any float involved yields a float and two strings
/// are concatenated. Everything else (as well as a missing field) leaves the
/// document alone.
pub fn add(field: impl Into<String>, value: impl Into<Value>) -> Mutation {
    let field = field.into();
    let value = value.into();

    Mutation::transform(move |fields| {
        let next = fields
            .get(&field)
            .and_then(|current| combine(current, &value, false));
        if let Some(next) = next {
            store(fields, &field, next);
        }
    })
}

/// Subtracts the given value from the given field.
///
/// Follows the numeric rules of [add]; strings cannot be subtracted.
pub fn subtract(field: impl Into<String>, value: impl Into<Value>) -> Mutation {
    let field = field.into();
    let value = value.into();

    Mutation::transform(move |fields| {
        let next = fields
            .get(&field)
            .and_then(|current| combine(current, &value, true));
        if let Some(next) = next {
            store(fields, &field, next);
        }
    })
}

/// Increments the given field by one.
pub fn increment(field: impl Into<String>) -> Mutation {
    add(field, 1)
}

/// Decrements the given field by one.
pub fn decrement(field: impl Into<String>) -> Mutation {
    subtract(field, 1)
}

/// Overwrites in place where possible so that the field order of the
/// document remains stable.
fn store(fields: &mut Object, field: &str, value: Value) {
    if let Some(slot) = fields.get_mut(field) {
        *slot = value;
    } else {
        let _ = fields.insert(field.to_string(), value);
    }
}

/// Computes `current + operand` (or `current - operand`), or None if the
/// types don't permit the operation.
fn combine(current: &Value, operand: &Value, subtract: bool) -> Option<Value> {
    match (current, operand) {
        (Value::Int(current), Value::Int(operand)) => {
            if subtract {
                current.checked_sub(*operand).map(Value::Int)
            } else {
                current.checked_add(*operand).map(Value::Int)
            }
        }
        (Value::Str(current), Value::Str(operand)) if !subtract => {
            Some(Value::Str(format!("{}{}", current, operand)))
        }
        _ => {
            let current = current.as_float()?;
            let operand = operand.as_float()?;
            if subtract {
                Some(Value::Float(current - operand))
            } else {
                Some(Value::Float(current + operand))
            }
        }
    }
}
