//! Callisto is an embedded document database which keeps schemaless
//! JSON-like documents in memory or in a single JSON file.
//!
//! # Introduction
//! **Callisto** is made for the many places where a full database server is
//! way too much machinery: configuration stores, small tools, test fixtures,
//! caches of master data. The whole database lives inside the process which
//! opened it - there is no server, no connection pool and no query language
//! to speak. Queries are plain Rust values built from composable
//! [predicates](query), results are owned snapshots which remain stable no
//! matter what happens to the table afterwards.
//!
//! Every mutation runs as an atomic read-modify-write of the underlying
//! storage and advances a per-table generation counter. Query results are
//! cached per table and tagged with that generation, so repeated queries are
//! served instantly while stale results can never be observed. The cache can
//! even patch its entries in place instead of discarding them, see
//! [CacheStrategy](config::CacheStrategy).
//!
//! # Features
//! * **Schemaless documents** made of [values](docs::Value) which preserve
//!   their field order and nest arbitrarily deep.
//! * **Typed queries without strings attached**: conditions are built via
//!   [field](query::field) and combined with `&`, `|` and `!`. Path misses
//!   and type mismatches simply don't match instead of failing a query.
//! * **Transparent query caching** with LRU eviction, generation tagging and
//!   a choice between invalidating and incrementally patched caches.
//! * **Pluggable storage**: a JSON file compatible with the obvious
//!   hand-written format, a pure in-memory backend for tests and a write
//!   cache to batch file writes, see [storage].
//! * **Data import** from YAML and CSV files as one batch insert per file,
//!   see [load].
//!
//! # Modules
//! * **[docs]**: The document model - [values](docs::Value), objects and
//!   [documents](docs::Document) with their ids.
//! * **[query]**: Fields, predicates and their cache keys.
//! * **[db]**: The [Database](db::Database) itself along with its
//!   [tables](db::Table).
//! * **[ops]**: Ready-made mutations like [increment](ops::increment) or
//!   [delete](ops::delete).
//! * **[storage]**: The [Storage](storage::Storage) trait and its backends.
//! * **[load]**: YAML and CSV imports.
//!
//! # Example
//! ```
//! use callisto::db::Database;
//! use callisto::query::field;
//! use callisto::object;
//!
//! let db = Database::memory().unwrap();
//! let moons = db.table("moons").unwrap();
//!
//! moons.insert(object! { "name" => "Io", "radius_km" => 1821.6 }).unwrap();
//! moons.insert(object! { "name" => "Europa", "radius_km" => 1560.8 }).unwrap();
//! moons.insert(object! { "name" => "Ganymede", "radius_km" => 2634.1 }).unwrap();
//!
//! let large = moons.search(&field("radius_km").greater_than(1800)).unwrap();
//! assert_eq!(large.len(), 2);
//!
//! moons.update(object! { "visited" => true }, Some(&field("name").equals("Io")), None).unwrap();
//! assert_eq!(moons.count(&field("visited").equals(true)).unwrap(), 1);
//! ```
#![deny(
    warnings,
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod config;
pub mod db;
pub mod docs;
pub mod error;
pub mod load;
pub mod ops;
pub mod query;
pub mod storage;

/// Contains the version of the Callisto library.
pub const CALLISTO_VERSION: &str = "DEVELOPMENT-SNAPSHOT";

/// Contains the git commit hash of the Callisto build being used.
pub const CALLISTO_REVISION: &str = "NO-REVISION";

/// Initializes the logging system.
///
/// Being an embedded library, Callisto never sets up logging on its own as
/// the surrounding application most probably already did so. This helper is
/// therefore mainly useful for tests and small tools.
///
/// # Example
///
/// ```
/// callisto::init_logging();
/// // Later initializations are simply ignored...
/// callisto::init_logging();
/// ```
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // We need to do this as otherwise the integration tests might crash as the logging system
    // is initialized several times...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            panic!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Builds an [Object](docs::Object) from `key => value` pairs.
///
/// Keys are anything with a `to_string()`, values are anything which converts
/// [into a Value](docs::Value). The field order is the order given here.
///
/// # Example
/// ```
/// # use callisto::object;
/// let moon = object! { "name" => "Io", "radius_km" => 1821.6, "active" => true };
///
/// assert_eq!(moon["name"].as_str(), Some("Io"));
/// assert_eq!(moon.keys().collect::<Vec<_>>(), vec!["name", "radius_km", "active"]);
/// ```
#[macro_export]
macro_rules! object {
    () => {
        $crate::docs::Object::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut object = $crate::docs::Object::new();
        $(
            let _ = object.insert($key.to_string(), $crate::docs::Value::from($value));
        )+
        object
    }};
}
