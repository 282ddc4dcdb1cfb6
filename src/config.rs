//! Contains the tunables applied when opening a database.
//!
//! [Options] is a plain chainable builder. All settings have sensible
//! defaults, so most callers never touch this module and simply use
//! [Database::memory](crate::db::Database::memory) or
//! [Database::open_json](crate::db::Database::open_json).

/// The name of the table used by
/// [Database::default_table](crate::db::Database::default_table) unless
/// reconfigured.
pub const DEFAULT_TABLE: &str = "_default";

/// The number of query results each table caches unless reconfigured.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Determines how a table's query cache reacts to mutations.
///
/// Both strategies are observationally equivalent: a search always returns
/// exactly what an uncached table would return. They only differ in how much
/// cached work survives a mutation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheStrategy {
    /// Drops all cached results whenever the table changes. Simple and
    /// always correct, but every mutation forces all queries to re-run.
    Invalidate,

    /// Keeps cached results alive by patching them with the observed change
    /// (appending inserted documents, pruning removed ones and so on). An
    /// entry is only dropped when patching cannot reconstruct it.
    Incremental,
}

/// Tunables for a [Database](crate::db::Database).
///
/// # Example
///
/// ```
/// use callisto::config::{CacheStrategy, Options};
///
/// let options = Options::new()
///     .default_table("moons")
///     .cache_capacity(Some(100))
///     .cache_strategy(CacheStrategy::Incremental);
/// ```
#[derive(Clone, Debug)]
pub struct Options {
    pub(crate) default_table: String,
    pub(crate) cache_capacity: Option<usize>,
    pub(crate) cache_strategy: CacheStrategy,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            default_table: DEFAULT_TABLE.to_string(),
            cache_capacity: Some(DEFAULT_CACHE_CAPACITY),
            cache_strategy: CacheStrategy::Invalidate,
        }
    }
}

impl Options {
    /// Creates options carrying all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks the table served by [Database::default_table](crate::db::Database::default_table).
    pub fn default_table(mut self, name: impl Into<String>) -> Self {
        self.default_table = name.into();
        self
    }

    /// Bounds the query cache of each table.
    ///
    /// `Some(0)` disables caching entirely and `None` lifts the bound, which
    /// is only advisable for a small and known set of distinct queries.
    pub fn cache_capacity(mut self, capacity: Option<usize>) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Picks the [CacheStrategy] of each table.
    pub fn cache_strategy(mut self, strategy: CacheStrategy) -> Self {
        self.cache_strategy = strategy;
        self
    }
}
