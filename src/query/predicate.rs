//! Implements predicates: compiled, reusable and cacheable query conditions.
//!
//! A [Predicate] wraps a closed condition tree together with its [QueryKey].
//! Evaluation is a single recursive walk which resolves the path of each leaf
//! and applies the operator; combinators short-circuit from left to right. A
//! path which doesn't resolve or a comparison between incompatible types makes
//! the affected leaf evaluate to false - predicates never fail at runtime.
//!
//! The key is a deterministic rendering of the whole tree. Two predicates
//! built independently from equal parts produce equal keys and therefore share
//! a slot in the query cache; `PartialEq`, `Eq` and `Hash` of [Predicate] all
//! delegate to the key. Note that keys are order-sensitive: `a & b` and
//! `b & a` match the same documents but are distinct cache entries.
//!
//! # Examples
//!
//! ```
//! # use callisto::query::field;
//! # use callisto::object;
//! let rocky = field("radius_km").less_than(3000) & field("rings").equals(false);
//!
//! assert!(rocky.matches(&object! { "radius_km" => 1821, "rings" => false }));
//! assert!(!rocky.matches(&object! { "radius_km" => 58232, "rings" => true }));
//!
//! // Equal structure means equal identity...
//! assert_eq!(
//!     field("radius_km").less_than(3000) & field("rings").equals(false),
//!     rocky
//! );
//! ```
use std::cmp::Ordering;
use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::sync::Arc;

use itertools::Itertools;

use crate::docs::{Object, Value};
use crate::query::field::{Path, Root, TestFn};

/// The closed set of conditions a predicate can be built from.
#[derive(Debug)]
pub(crate) enum Condition {
    Exists(Path),
    Equals(Path, Value),
    NotEquals(Path, Value),
    Less(Path, Value),
    LessOrEqual(Path, Value),
    Greater(Path, Value),
    GreaterOrEqual(Path, Value),
    Regex {
        path: Path,
        regex: regex::Regex,
        pattern: String,
        full: bool,
        ignore_case: bool,
    },
    OneOf(Path, Vec<Value>),
    AnyMatches(Path, Predicate),
    AnyIn(Path, Vec<Value>),
    AllMatch(Path, Predicate),
    AllIn(Path, Vec<Value>),
    Fragment(Path, Object),
    Test(Path, TestFn),
    And(Predicate, Predicate),
    Or(Predicate, Predicate),
    Not(Predicate),
    Always,
}

impl Condition {
    /// Evaluates this condition against the given root.
    ///
    /// This is the complete query engine: resolve the path, apply the
    /// operator, recurse for combinators.
    fn eval(&self, root: Root) -> bool {
        match self {
            Condition::Exists(path) => path.resolve(root).is_some(),
            Condition::Equals(path, expected) => path
                .resolve(root)
                .map(|value| value.as_ref() == expected)
                .unwrap_or(false),
            Condition::NotEquals(path, expected) => path
                .resolve(root)
                .map(|value| value.as_ref() != expected)
                .unwrap_or(false),
            Condition::Less(path, limit) => {
                Condition::compares(path, root, limit, |ordering| ordering == Ordering::Less)
            }
            Condition::LessOrEqual(path, limit) => {
                Condition::compares(path, root, limit, |ordering| ordering != Ordering::Greater)
            }
            Condition::Greater(path, limit) => {
                Condition::compares(path, root, limit, |ordering| ordering == Ordering::Greater)
            }
            Condition::GreaterOrEqual(path, limit) => {
                Condition::compares(path, root, limit, |ordering| ordering != Ordering::Less)
            }
            Condition::Regex { path, regex, .. } => path
                .resolve(root)
                .map(|value| {
                    value
                        .as_str()
                        .map(|string| regex.is_match(string))
                        .unwrap_or(false)
                })
                .unwrap_or(false),
            Condition::OneOf(path, values) => path
                .resolve(root)
                .map(|value| values.contains(value.as_ref()))
                .unwrap_or(false),
            Condition::AnyMatches(path, cond) => Condition::on_list(path, root, |list| {
                list.iter()
                    .any(|element| cond.cond.eval(Root::Element(element)))
            }),
            Condition::AnyIn(path, values) => Condition::on_list(path, root, |list| {
                list.iter().any(|element| values.contains(element))
            }),
            Condition::AllMatch(path, cond) => Condition::on_list(path, root, |list| {
                list.iter()
                    .all(|element| cond.cond.eval(Root::Element(element)))
            }),
            Condition::AllIn(path, values) => Condition::on_list(path, root, |list| {
                values.iter().all(|value| list.contains(value))
            }),
            Condition::Fragment(path, fragment) => path
                .resolve(root)
                .map(|value| {
                    value
                        .as_object()
                        .map(|object| {
                            fragment
                                .iter()
                                .all(|(key, expected)| object.get(key) == Some(expected))
                        })
                        .unwrap_or(false)
                })
                .unwrap_or(false),
            Condition::Test(path, test) => path
                .resolve(root)
                .map(|value| test.apply(value.as_ref()))
                .unwrap_or(false),
            Condition::And(left, right) => left.cond.eval(root) && right.cond.eval(root),
            Condition::Or(left, right) => left.cond.eval(root) || right.cond.eval(root),
            Condition::Not(inner) => !inner.cond.eval(root),
            Condition::Always => true,
        }
    }

    /// Resolves the path and checks the resulting ordering, treating
    /// incomparable pairings as a non-match.
    fn compares<C>(path: &Path, root: Root, limit: &Value, check: C) -> bool
    where
        C: Fn(Ordering) -> bool,
    {
        path.resolve(root)
            .and_then(|value| value.try_compare(limit))
            .map(check)
            .unwrap_or(false)
    }

    /// Resolves the path and applies the check to the list found there.
    /// Anything which is not a list is a non-match.
    fn on_list<C>(path: &Path, root: Root, check: C) -> bool
    where
        C: Fn(&[Value]) -> bool,
    {
        path.resolve(root)
            .map(|value| value.as_list().map(check).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Renders the deterministic key of this condition.
    fn render_key(&self) -> String {
        match self {
            Condition::Exists(path) => format!("exists({})", path.render_key()),
            Condition::Equals(path, value) => {
                format!("eq({},{})", path.render_key(), render_value(value))
            }
            Condition::NotEquals(path, value) => {
                format!("ne({},{})", path.render_key(), render_value(value))
            }
            Condition::Less(path, value) => {
                format!("lt({},{})", path.render_key(), render_value(value))
            }
            Condition::LessOrEqual(path, value) => {
                format!("le({},{})", path.render_key(), render_value(value))
            }
            Condition::Greater(path, value) => {
                format!("gt({},{})", path.render_key(), render_value(value))
            }
            Condition::GreaterOrEqual(path, value) => {
                format!("ge({},{})", path.render_key(), render_value(value))
            }
            Condition::Regex {
                path,
                pattern,
                full,
                ignore_case,
                ..
            } => format!(
                "re({},{},{},{:?})",
                path.render_key(),
                full,
                ignore_case,
                pattern
            ),
            Condition::OneOf(path, values) => {
                format!("one_of({},{})", path.render_key(), render_values(values))
            }
            Condition::AnyMatches(path, cond) => {
                format!("any({},{})", path.render_key(), cond.key)
            }
            Condition::AnyIn(path, values) => {
                format!("any_in({},{})", path.render_key(), render_values(values))
            }
            Condition::AllMatch(path, cond) => {
                format!("all({},{})", path.render_key(), cond.key)
            }
            Condition::AllIn(path, values) => {
                format!("all_in({},{})", path.render_key(), render_values(values))
            }
            Condition::Fragment(path, fragment) => {
                format!("fragment({},{})", path.render_key(), render_object(fragment))
            }
            Condition::Test(path, test) => {
                format!("test({},#{})", path.render_key(), test.token())
            }
            Condition::And(left, right) => format!("and({},{})", left.key, right.key),
            Condition::Or(left, right) => format!("or({},{})", left.key, right.key),
            Condition::Not(inner) => format!("not({})", inner.key),
            Condition::Always => "always".to_string(),
        }
    }
}

fn render_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(value) => value.to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) => render_float(*value),
        Value::Str(value) => format!("{:?}", value),
        Value::List(values) => render_values(values),
        Value::Object(object) => render_object(object),
    }
}

fn render_values(values: &[Value]) -> String {
    format!("[{}]", values.iter().map(render_value).join(","))
}

/// Renders an object with its keys sorted, as object equality ignores key
/// order and equal predicates have to produce equal keys.
fn render_object(object: &Object) -> String {
    let entries = object
        .iter()
        .sorted_by(|(left, _), (right, _)| left.cmp(right))
        .map(|(key, value)| format!("{:?}:{}", key, render_value(value)))
        .join(",");

    format!("{{{}}}", entries)
}

/// Renders a float so that numerically equal values produce equal keys:
/// integral floats render like the int they equal and `-0.0` renders as `0`.
fn render_float(value: f64) -> String {
    const EXACT_INT_RANGE: f64 = 9007199254740992.0;

    if value == 0.0 {
        "0".to_string()
    } else if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "inf" } else { "-inf" }.to_string()
    } else if value.fract() == 0.0 && value.abs() <= EXACT_INT_RANGE {
        (value as i64).to_string()
    } else {
        value.to_string()
    }
}

/// The cache identity of a predicate.
///
/// Keys render the full condition tree into a deterministic string; the query
/// cache of a table is an LRU over these keys. Displaying a key yields that
/// rendering, which also makes for readable log output.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A compiled query condition.
///
/// Predicates are built via [field](crate::query::field) (see the operator
/// methods of [Field](crate::query::Field)) and combined with `&`, `|` and
/// `!`. They are cheap to clone and can be evaluated any number of times.
#[derive(Clone, Debug)]
pub struct Predicate {
    cond: Arc<Condition>,
    key: QueryKey,
}

impl Predicate {
    /// Wraps a condition and computes its key.
    pub(crate) fn build(cond: Condition) -> Self {
        let key = QueryKey(cond.render_key());
        Predicate {
            cond: Arc::new(cond),
            key,
        }
    }

    /// Creates the predicate which matches every document.
    ///
    /// This is the condition behind "fetch all" scans and a neutral starting
    /// point when assembling predicates programmatically.
    pub fn always() -> Self {
        Predicate::build(Condition::Always)
    }

    /// Determines if the given document fields satisfy this predicate.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let query = !field("archived").equals(true);
    /// assert!(query.matches(&object! { "archived" => false }));
    /// assert!(query.matches(&object! {}));
    /// ```
    pub fn matches(&self, fields: &Object) -> bool {
        self.cond.eval(Root::Object(fields))
    }

    /// Returns the cache identity of this predicate.
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Predicate {}

impl std::hash::Hash for Predicate {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.key, f)
    }
}

impl BitAnd for Predicate {
    type Output = Predicate;

    fn bitand(self, rhs: Predicate) -> Predicate {
        Predicate::build(Condition::And(self, rhs))
    }
}

impl BitOr for Predicate {
    type Output = Predicate;

    fn bitor(self, rhs: Predicate) -> Predicate {
        Predicate::build(Condition::Or(self, rhs))
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Predicate {
        Predicate::build(Condition::Not(self))
    }
}
