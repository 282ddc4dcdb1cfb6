//! Provides the document model: values, objects and documents.
//!
//! A table stores documents. Each [Document] is an [Object] (an ordered map
//! from field names to [Value]s) plus the [DocId] under which the table keeps
//! it. Objects nest arbitrarily deep via [Value::List] and [Value::Object],
//! and keys keep their insertion order - a document which was written as
//! `{name, age}` will iterate and serialize as `{name, age}` forever.
//!
//! Ids are managed entirely by the table: a fresh document receives the
//! highest existing id plus one (or 1 into an empty table), and once assigned
//! an id sticks to its document until it is removed. Ids are never recomputed,
//! reordered or compacted by updates.
//!
//! The [json] helpers ([object_from_json] / [object_to_json]) convert between
//! this model and `serde_json` values, which is also how the JSON file storage
//! persists snapshots.
//!
//! # Example
//!
//! ```
//! # use callisto::docs::{Document, Value};
//! # use callisto::object;
//! let doc = Document::new(1, object! { "name" => "Callisto", "radius_km" => 2410 });
//!
//! assert_eq!(doc.id(), 1);
//! assert_eq!(doc.get("name").and_then(Value::as_str), Some("Callisto"));
//! ```
mod document;
mod value;

pub mod json;

pub use document::{DocId, Document};
pub use json::{object_from_json, object_to_json, value_from_json, value_to_json};
pub use value::{Object, Value};
