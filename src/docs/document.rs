//! Defines documents, the unit of storage within a table.
//!
//! A [Document] couples the fields of a stored object with the [DocId] under
//! which the table keeps it. The id is assigned exactly once when the document
//! is inserted and never changes afterwards, no matter how often the contents
//! are updated.
use crate::docs::value::object_eq;
use crate::docs::{Object, Value};

/// Identifies a document within its table.
///
/// Ids are positive (never 0). A fresh id is the highest id in the table plus
/// one, or 1 for an empty table.
pub type DocId = u64;

/// A document as returned by queries: its id plus its fields.
#[derive(Clone, Debug)]
pub struct Document {
    id: DocId,
    fields: Object,
}

impl Document {
    /// Creates a document from an id and its fields.
    pub fn new(id: DocId, fields: Object) -> Self {
        Document { id, fields }
    }

    /// Returns the id under which the table stores this document.
    pub fn id(&self) -> DocId {
        self.id
    }

    /// Provides access to the fields of this document.
    pub fn fields(&self) -> &Object {
        &self.fields
    }

    /// Unwraps the document into its fields, discarding the id.
    pub fn into_fields(self) -> Object {
        self.fields
    }

    /// Returns the value of a top level field or `None` if absent.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::docs::{Document, Value};
    /// # use callisto::object;
    /// let doc = Document::new(1, object! { "name" => "Aldrin" });
    /// assert_eq!(doc.get("name").and_then(Value::as_str), Some("Aldrin"));
    /// assert_eq!(doc.get("unknown"), None);
    /// ```
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Returns the number of top level fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Determines if this document has no fields at all.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Two documents are equal if they share the same id and deeply equal fields.
impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && object_eq(&self.fields, &other.fields)
    }
}
