//! Defines the error taxonomy shared by all database operations.
//!
//! Every fallible operation in this crate returns [Result]. The set of errors is
//! deliberately closed: a path which doesn't resolve or a comparison between
//! incompatible types is a non-match, never an error. Only genuinely broken
//! inputs (malformed documents, conflicting ids, contradictory query arguments)
//! or a failing storage backend surface here.
use crate::docs::DocId;

/// Enumerates all errors reported by database operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Document data was structurally invalid (e.g. a non-object where a document
    /// was expected, a zero id or corrupted data read from a storage).
    #[error("invalid document: {0}")]
    InvalidDocument(String),

    /// An insert requested an id which is already taken by another document.
    #[error("a document with id {0} already exists")]
    IdConflict(DocId),

    /// A query or operation was given contradictory or unusable arguments
    /// (e.g. an invalid regular expression or both a condition and an id list
    /// where only one is permitted).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The underlying storage failed or has been closed. The original cause is
    /// preserved and reported verbatim.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// The result type used by all fallible operations of this crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates an [Error::StorageUnavailable] from any underlying cause.
    pub fn storage(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::StorageUnavailable(cause.into())
    }

    /// Reports a lock which was poisoned by a panicking thread.
    ///
    /// We treat this like a failing storage, as the affected state can no longer
    /// be trusted.
    pub(crate) fn poisoned() -> Self {
        Error::storage("lock poisoned by a panicking thread")
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::storage(error)
    }
}
