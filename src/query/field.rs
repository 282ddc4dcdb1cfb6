//! Provides the fluent builder for paths and the predicates operating on them.
//!
//! A query starts at a field: [field] creates a [Field] which can be refined
//! into nested keys ([Field::key]), list positions ([Field::at]) or derived
//! values ([Field::map]) and is then turned into a [Predicate] by one of the
//! operator methods.
//!
//! Note that a path is a chain of explicit segments. There is no splitting on
//! `.` or any other separator, so a field literally named `a.b` is addressed
//! as `field("a.b")` and remains distinct from `field("a").key("b")`.
//!
//! # Examples
//!
//! ```
//! # use callisto::query::field;
//! # use callisto::object;
//! let munich = object! {
//!     "name" => "Munich",
//!     "address" => object! { "country" => "DE" },
//!     "tags" => vec!["bavaria", "isar"]
//! };
//!
//! assert!(field("name").equals("Munich").matches(&munich));
//! assert!(field("address").key("country").equals("DE").matches(&munich));
//! assert!(field("tags").at(0).equals("bavaria").matches(&munich));
//! assert!(!field("population").exists().matches(&munich));
//! ```
use std::borrow::Cow;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use itertools::Itertools;
use regex::RegexBuilder;

use crate::docs::{Object, Value};
use crate::error::{Error, Result};
use crate::query::predicate::{Condition, Predicate};

/// Hands out process-wide unique tokens for test and map functions.
///
/// Tokens are never reused, therefore a token fully identifies a function
/// wrapper for the lifetime of the process (which is exactly the scope of the
/// query cache).
static NEXT_FN_TOKEN: AtomicU64 = AtomicU64::new(1);

fn next_fn_token() -> u64 {
    NEXT_FN_TOKEN.fetch_add(1, Ordering::Relaxed)
}

/// A custom test function usable via [Field::test].
///
/// The wrapper carries an identity token which becomes part of the cache key
/// of every predicate built from it: clones share the token, while wrapping
/// even the very same closure twice yields two distinct identities. Create a
/// `TestFn` once and clone it wherever cached queries should recognize it as
/// the same condition.
///
/// # Example
///
/// ```
/// # use callisto::query::{field, TestFn};
/// # use callisto::object;
/// let is_even = TestFn::new(|value| value.as_int().map(|i| i % 2 == 0).unwrap_or(false));
///
/// let query = field("count").test(is_even.clone());
/// assert!(query.matches(&object! { "count" => 4 }));
/// assert!(!query.matches(&object! { "count" => 5 }));
///
/// // Clones share their identity, so both predicates hit the same cache slot...
/// assert_eq!(field("count").test(is_even.clone()), field("count").test(is_even));
/// ```
#[derive(Clone)]
pub struct TestFn {
    token: u64,
    fun: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl TestFn {
    /// Wraps the given function under a fresh identity token.
    pub fn new<F>(fun: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        TestFn {
            token: next_fn_token(),
            fun: Arc::new(fun),
        }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    pub(crate) fn apply(&self, value: &Value) -> bool {
        (self.fun)(value)
    }
}

impl<F> From<F> for TestFn
where
    F: Fn(&Value) -> bool + Send + Sync + 'static,
{
    fn from(fun: F) -> Self {
        TestFn::new(fun)
    }
}

impl fmt::Debug for TestFn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "TestFn(#{})", self.token)
    }
}

/// A value transform usable as a path segment via [Field::map].
///
/// The transform receives the value resolved so far and produces the value the
/// rest of the path continues with; `None` is treated like a missing field.
/// Identity works exactly like for [TestFn]: clones share a token, re-wrapping
/// does not.
#[derive(Clone)]
pub struct MapFn {
    token: u64,
    fun: Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>,
}

impl MapFn {
    /// Wraps the given transform under a fresh identity token.
    pub fn new<F>(fun: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        MapFn {
            token: next_fn_token(),
            fun: Arc::new(fun),
        }
    }

    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    pub(crate) fn apply(&self, value: &Value) -> Option<Value> {
        (self.fun)(value)
    }
}

impl<F> From<F> for MapFn
where
    F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
{
    fn from(fun: F) -> Self {
        MapFn::new(fun)
    }
}

impl fmt::Debug for MapFn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MapFn(#{})", self.token)
    }
}

/// A single step within a path.
#[derive(Clone, Debug)]
pub(crate) enum Segment {
    Key(String),
    Index(usize),
    Map(MapFn),
}

/// The evaluation root a path starts from.
///
/// Top level predicates run against the field object of a document. Nested
/// predicates (within `any` / `all`) run against a list element, which can be
/// any value.
#[derive(Clone, Copy)]
pub(crate) enum Root<'a> {
    Object(&'a Object),
    Element(&'a Value),
}

/// A compiled path: the segments leading from the root to the examined value.
#[derive(Clone, Debug, Default)]
pub(crate) struct Path {
    segments: Vec<Segment>,
}

impl Path {
    /// Resolves this path against the given root.
    ///
    /// Returns `None` on a path miss: a missing key, an index out of range, a
    /// key applied to a non-object, an index applied to a non-list or a map
    /// transform yielding nothing. An empty path resolves to the root itself.
    pub(crate) fn resolve<'a>(&self, root: Root<'a>) -> Option<Cow<'a, Value>> {
        let mut segments = self.segments.iter();

        // The first step starts at the root. For a document root we avoid
        // materializing the object as a value unless the path actually
        // targets the root itself...
        let mut current = match root {
            Root::Element(value) => Cow::Borrowed(value),
            Root::Object(object) => match segments.next() {
                None => Cow::Owned(Value::Object(object.clone())),
                Some(Segment::Key(key)) => Cow::Borrowed(object.get(key)?),
                Some(Segment::Index(_)) => return None,
                Some(Segment::Map(map)) => Cow::Owned(map.apply(&Value::Object(object.clone()))?),
            },
        };

        for segment in segments {
            current = Path::step(current, segment)?;
        }

        Some(current)
    }

    /// Performs a single path step, consuming owned intermediate values
    /// instead of cloning out of them.
    fn step<'a>(current: Cow<'a, Value>, segment: &Segment) -> Option<Cow<'a, Value>> {
        match segment {
            Segment::Key(key) => match current {
                Cow::Borrowed(Value::Object(object)) => object.get(key).map(Cow::Borrowed),
                Cow::Owned(Value::Object(mut object)) => object.remove(key).map(Cow::Owned),
                _ => None,
            },
            Segment::Index(index) => match current {
                Cow::Borrowed(Value::List(list)) => list.get(*index).map(Cow::Borrowed),
                Cow::Owned(Value::List(mut list)) => {
                    if *index < list.len() {
                        Some(Cow::Owned(list.swap_remove(*index)))
                    } else {
                        None
                    }
                }
                _ => None,
            },
            Segment::Map(map) => map.apply(current.as_ref()).map(Cow::Owned),
        }
    }

    /// Renders the path into a cache key fragment.
    ///
    /// Keys are quoted so that a field named `a.b` can never collide with the
    /// chain `a` -> `b`, and map segments contribute their identity token.
    pub(crate) fn render_key(&self) -> String {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Key(key) => format!("{:?}", key),
                Segment::Index(index) => format!("[{}]", index),
                Segment::Map(map) => format!("map#{}", map.token()),
            })
            .join(".")
    }
}

/// Starts a query path at the given top level field.
///
/// # Example
///
/// ```
/// # use callisto::query::field;
/// # use callisto::object;
/// let query = field("age").greater_or_equal(18);
/// assert!(query.matches(&object! { "age" => 21 }));
/// assert!(!query.matches(&object! { "age" => 17 }));
/// ```
pub fn field(name: impl Into<String>) -> Field {
    Field::root().key(name)
}

/// A partially built query: a path waiting for an operator.
///
/// Obtained via [field] (or [Field::root] for the rare whole-document case)
/// and refined with [Field::key], [Field::at] and [Field::map]. Every operator
/// method consumes the builder and produces a [Predicate].
#[derive(Clone, Debug)]
pub struct Field {
    path: Path,
}

impl Field {
    /// Creates the empty path which denotes the document itself.
    ///
    /// Mostly useful together with [Field::fragment] or within `any` / `all`
    /// conditions where the examined elements are plain values.
    pub fn root() -> Self {
        Field {
            path: Path::default(),
        }
    }

    /// Descends into the given key of the current object.
    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.path.segments.push(Segment::Key(name.into()));
        self
    }

    /// Descends into the given position of the current list.
    pub fn at(mut self, index: usize) -> Self {
        self.path.segments.push(Segment::Index(index));
        self
    }

    /// Transforms the current value before the remaining path continues.
    ///
    /// The transform participates in caching via its identity token, so a
    /// query built from a cloned [MapFn] remains fully cacheable.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::docs::Value;
    /// # use callisto::query::{field, MapFn};
    /// # use callisto::object;
    /// let doubled = MapFn::new(|value| value.as_int().map(|i| Value::Int(i * 2)));
    /// let query = field("count").map(doubled).equals(42);
    ///
    /// assert!(query.matches(&object! { "count" => 21 }));
    /// assert!(!query.matches(&object! { "count" => 42 }));
    /// ```
    pub fn map(mut self, map: impl Into<MapFn>) -> Self {
        self.path.segments.push(Segment::Map(map.into()));
        self
    }

    /// Requires that the path resolves to a value.
    ///
    /// Note that an explicit `Null` exists, in contrast to an absent field.
    pub fn exists(self) -> Predicate {
        Predicate::build(Condition::Exists(self.path))
    }

    /// Requires the value at the path to equal the given value.
    pub fn equals(self, value: impl Into<Value>) -> Predicate {
        Predicate::build(Condition::Equals(self.path, value.into()))
    }

    /// Requires the path to resolve to a value different from the given one.
    ///
    /// Note that a missing path is a non-match, not a difference.
    pub fn not_equals(self, value: impl Into<Value>) -> Predicate {
        Predicate::build(Condition::NotEquals(self.path, value.into()))
    }

    /// Requires the value at the path to be strictly less than the given one.
    pub fn less_than(self, value: impl Into<Value>) -> Predicate {
        Predicate::build(Condition::Less(self.path, value.into()))
    }

    /// Requires the value at the path to be less than or equal to the given one.
    pub fn less_or_equal(self, value: impl Into<Value>) -> Predicate {
        Predicate::build(Condition::LessOrEqual(self.path, value.into()))
    }

    /// Requires the value at the path to be strictly greater than the given one.
    pub fn greater_than(self, value: impl Into<Value>) -> Predicate {
        Predicate::build(Condition::Greater(self.path, value.into()))
    }

    /// Requires the value at the path to be greater than or equal to the given one.
    pub fn greater_or_equal(self, value: impl Into<Value>) -> Predicate {
        Predicate::build(Condition::GreaterOrEqual(self.path, value.into()))
    }

    /// Requires the string at the path to match the pattern in its entirety.
    ///
    /// The pattern is implicitly anchored at both ends; non-string values
    /// never match.
    ///
    /// # Errors
    /// Fails with [Error::InvalidQuery] if the pattern is not a valid regular
    /// expression.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let query = field("code").matches("[A-Z]{2}-[0-9]+").unwrap();
    /// assert!(query.matches(&object! { "code" => "DE-42" }));
    /// assert!(!query.matches(&object! { "code" => "xDE-42x" }));
    /// ```
    pub fn matches(self, pattern: &str) -> Result<Predicate> {
        self.regex(pattern, true, false)
    }

    /// Like [Field::matches], but case-insensitive.
    pub fn matches_ignore_case(self, pattern: &str) -> Result<Predicate> {
        self.regex(pattern, true, true)
    }

    /// Requires the string at the path to contain a match of the pattern.
    ///
    /// # Errors
    /// Fails with [Error::InvalidQuery] if the pattern is not a valid regular
    /// expression.
    pub fn search(self, pattern: &str) -> Result<Predicate> {
        self.regex(pattern, false, false)
    }

    /// Like [Field::search], but case-insensitive.
    pub fn search_ignore_case(self, pattern: &str) -> Result<Predicate> {
        self.regex(pattern, false, true)
    }

    fn regex(self, pattern: &str, full: bool, ignore_case: bool) -> Result<Predicate> {
        let effective_pattern = if full {
            format!(r"\A(?:{})\z", pattern)
        } else {
            pattern.to_string()
        };
        let regex = RegexBuilder::new(&effective_pattern)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|error| {
                Error::InvalidQuery(format!("invalid pattern {:?}: {}", pattern, error))
            })?;

        Ok(Predicate::build(Condition::Regex {
            path: self.path,
            regex,
            pattern: pattern.to_string(),
            full,
            ignore_case,
        }))
    }

    /// Requires the value at the path to equal one of the given values.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let query = field("state").one_of(["NEW", "OPEN"]);
    /// assert!(query.matches(&object! { "state" => "OPEN" }));
    /// assert!(!query.matches(&object! { "state" => "CLOSED" }));
    /// ```
    pub fn one_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::build(Condition::OneOf(self.path, collect_values(values)))
    }

    /// Requires the list at the path to contain an element satisfying the
    /// given predicate.
    ///
    /// The nested predicate runs against each element; use [Field::root]
    /// within it to address scalar elements directly.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let query = field("ports").any(field("open").equals(true));
    /// let doc = object! {
    ///     "ports" => vec![object! { "open" => false }, object! { "open" => true }]
    /// };
    /// assert!(query.matches(&doc));
    /// ```
    pub fn any(self, cond: Predicate) -> Predicate {
        Predicate::build(Condition::AnyMatches(self.path, cond))
    }

    /// Requires the list at the path to share at least one element with the
    /// given values.
    pub fn any_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::build(Condition::AnyIn(self.path, collect_values(values)))
    }

    /// Requires every element of the list at the path to satisfy the given
    /// predicate. An empty list satisfies this vacuously.
    pub fn all(self, cond: Predicate) -> Predicate {
        Predicate::build(Condition::AllMatch(self.path, cond))
    }

    /// Requires the list at the path to contain every one of the given values.
    /// An empty value list is vacuously contained.
    pub fn all_of<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Predicate {
        Predicate::build(Condition::AllIn(self.path, collect_values(values)))
    }

    /// Requires the object at the path to contain every key of the given
    /// fragment with a deeply equal value.
    ///
    /// The empty fragment matches any object at the path.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::query::{field, Field};
    /// # use callisto::object;
    /// let doc = object! { "name" => "Ganymede", "orbit" => object! { "days" => 7, "e" => 0.0013 } };
    ///
    /// assert!(field("orbit").fragment(object! { "days" => 7 }).matches(&doc));
    /// assert!(Field::root().fragment(object! { "name" => "Ganymede" }).matches(&doc));
    /// assert!(!field("orbit").fragment(object! { "days" => 8 }).matches(&doc));
    /// ```
    pub fn fragment(self, fragment: Object) -> Predicate {
        Predicate::build(Condition::Fragment(self.path, fragment))
    }

    /// Requires the value at the path to satisfy the given test function.
    ///
    /// See [TestFn] for how custom tests interact with the query cache.
    pub fn test(self, test: impl Into<TestFn>) -> Predicate {
        Predicate::build(Condition::Test(self.path, test.into()))
    }
}

fn collect_values<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Vec<Value> {
    values.into_iter().map(Into::into).collect()
}
