//! Provides the query engine: paths, operators and combinable predicates.
//!
//! Queries are built fluently. A path selects a value within a document
//! ([field], refined via [Field::key], [Field::at] and [Field::map]), an
//! operator turns the path into a [Predicate] and predicates combine with
//! `&`, `|` and `!`. Predicates are immutable, cheap to clone and carry a
//! deterministic [QueryKey] which the table-level query cache uses to
//! recognize repeated queries - structurally equal predicates share cached
//! results, no matter where they were built.
//!
//! Evaluation never fails: a path which doesn't resolve, a comparison between
//! incompatible types or a regex applied to a non-string are all simply
//! non-matches.
//!
//! # Examples
//!
//! ```
//! # use callisto::query::field;
//! # use callisto::object;
//! let doc = object! {
//!     "name" => "Amalthea",
//!     "radius_km" => 83.5,
//!     "tags" => vec!["inner", "irregular"]
//! };
//!
//! let small_inner = field("radius_km").less_than(100) & field("tags").any_of(["inner"]);
//! assert!(small_inner.matches(&doc));
//!
//! let named_like = field("name").matches("Ama.*").unwrap();
//! assert!(named_like.matches(&doc));
//! ```
mod field;
mod predicate;

pub use field::{field, Field, MapFn, TestFn};
pub use predicate::{Predicate, QueryKey};
