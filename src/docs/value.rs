//! Defines the value model used within documents.
//!
//! A [Value] is a closed union of everything a document field can hold. Values
//! nest arbitrarily via lists and objects, where an [Object] keeps its keys in
//! insertion order (just like the documents which contain them).
//!
//! Equality is structural with one exception: ints and floats compare
//! numerically across variants, therefore `1 == 1.0`. Objects compare by key
//! set, not by key order. Ordering (as used by the range operators of the query
//! engine) is only defined between numbers, between strings and between bools -
//! every other pairing is simply not ordered.
//!
//! # Examples
//!
//! ```
//! # use callisto::docs::Value;
//! assert_eq!(Value::from(1), Value::from(1.0));
//! assert_ne!(Value::from(true), Value::from(1));
//! assert_eq!(Value::from("foo").as_str(), Some("foo"));
//! ```
use std::cmp::Ordering;

use linked_hash_map::LinkedHashMap;

/// An ordered map from field names to values.
///
/// This is the shape of a document body as well as of every nested object
/// within one. Iteration yields entries in insertion order.
pub type Object = LinkedHashMap<String, Value>;

/// Represents a single value within a document.
#[derive(Clone, Debug)]
pub enum Value {
    /// An explicitly present "nothing". Note that a field holding `Null` still
    /// exists, in contrast to a field which is absent altogether.
    Null,

    /// A boolean. Never equal to a number.
    Bool(bool),

    /// A signed integer.
    Int(i64),

    /// A floating point number.
    Float(f64),

    /// A string.
    Str(String),

    /// A list of values.
    List(Vec<Value>),

    /// A nested object with ordered keys.
    Object(Object),
}

impl Value {
    /// Determines if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the wrapped bool or `None` for any other variant.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the wrapped int or `None` for any other variant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the numeric value as f64 for both ints and floats.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(value) => Some(*value as f64),
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the wrapped string or `None` for any other variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    /// Returns the wrapped list or `None` for any other variant.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(values) => Some(values.as_slice()),
            _ => None,
        }
    }

    /// Returns the wrapped object or `None` for any other variant.
    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Returns the name of the variant as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Object(_) => "object",
        }
    }

    /// Compares two values if (and only if) they are of comparable types.
    ///
    /// Numbers compare with numbers (ints and floats mix), strings
    /// lexicographically with strings and bools with bools (`false < true`).
    /// Everything else, including `Null`, lists and objects, is unordered and
    /// yields `None` - which makes the range operators of the query engine
    /// evaluate to false.
    ///
    /// # Examples
    ///
    /// ```
    /// # use callisto::docs::Value;
    /// # use std::cmp::Ordering;
    /// assert_eq!(Value::from(1).try_compare(&Value::from(2.5)), Some(Ordering::Less));
    /// assert_eq!(Value::from("a").try_compare(&Value::from("b")), Some(Ordering::Less));
    /// assert_eq!(Value::from("a").try_compare(&Value::from(1)), None);
    /// assert_eq!(Value::Null.try_compare(&Value::Null), None);
    /// ```
    pub fn try_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(left), Value::Str(right)) => Some(left.cmp(right)),
            (Value::Bool(left), Value::Bool(right)) => Some(left.cmp(right)),
            _ => {
                let left = self.as_float()?;
                let right = other.as_float()?;
                left.partial_cmp(&right)
            }
        }
    }
}

/// Determines if two objects are deeply equal.
///
/// Objects maintain insertion order, but equality deliberately ignores it: two
/// objects are equal if they contain the same keys with equal values.
pub(crate) fn object_eq(left: &Object, right: &Object) -> bool {
    left.len() == right.len()
        && left
            .iter()
            .all(|(key, value)| right.get(key) == Some(value))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(left), Value::Bool(right)) => left == right,
            (Value::Int(left), Value::Int(right)) => left == right,
            (Value::Float(left), Value::Float(right)) => left == right,
            (Value::Int(left), Value::Float(right)) => (*left as f64) == *right,
            (Value::Float(left), Value::Int(right)) => *left == (*right as f64),
            (Value::Str(left), Value::Str(right)) => left == right,
            (Value::List(left), Value::List(right)) => left == right,
            (Value::Object(left), Value::Object(right)) => object_eq(left, right),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<Object> for Value {
    fn from(value: Object) -> Self {
        Value::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}
