//! Provides the database itself: a set of named [tables](Table) sharing one
//! [storage](crate::storage::Storage).
//!
//! A [Database] hands out cheap table handles and guarantees that all handles
//! for the same name share their query cache and generation counter. The
//! storage is guarded by a single lock, so every operation observes and
//! produces a consistent snapshot - across tables, as the whole database is
//! written as one document.
//!
//! # Example
//!
//! ```
//! use callisto::db::Database;
//! use callisto::query::field;
//! use callisto::object;
//!
//! let db = Database::memory().unwrap();
//! let moons = db.table("moons").unwrap();
//!
//! moons.insert(object! { "name" => "Io", "active" => true }).unwrap();
//! moons.insert(object! { "name" => "Europa", "active" => false }).unwrap();
//!
//! let active = moons.search(&field("active").equals(true)).unwrap();
//! assert_eq!(active.len(), 1);
//! ```
mod cache;
mod table;

pub use cache::CacheStats;
pub use table::{Mutation, Table, TableIter};

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::config::Options;
use crate::db::table::SharedStorage;
use crate::error::{Error, Result};
use crate::storage::{JsonFileStorage, MemoryStorage, Snapshot, Storage};

/// An embedded document database.
///
/// All tables live in one [Storage]; dropping the database (or calling
/// [Database::close]) closes that storage. The database is `Send` and `Sync`,
/// so handles may be shared freely between threads.
pub struct Database {
    storage: SharedStorage,
    tables: Mutex<HashMap<String, Table>>,
    options: Options,
}

impl Database {
    /// Opens a database on the given storage using default [Options].
    pub fn open(storage: Box<dyn Storage>) -> Result<Self> {
        Self::open_with(storage, Options::new())
    }

    /// Opens a database on the given storage using the given options.
    ///
    /// A storage which was never written to (a fresh file, an empty memory
    /// backend) is initialized with an empty snapshot right away.
    pub fn open_with(mut storage: Box<dyn Storage>, options: Options) -> Result<Self> {
        if storage.read()?.is_none() {
            storage.write(&Snapshot::new())?;
            log::debug!("Initialized the storage with an empty snapshot");
        }
        log::info!(
            "Callisto (v {} - rev {}) opened a database",
            crate::CALLISTO_VERSION,
            crate::CALLISTO_REVISION
        );

        Ok(Database {
            storage: Arc::new(Mutex::new(storage)),
            tables: Mutex::new(HashMap::new()),
            options,
        })
    }

    /// Opens a purely in-memory database, mostly useful for tests.
    pub fn memory() -> Result<Self> {
        Self::open(Box::new(MemoryStorage::new()))
    }

    /// Opens (or creates) a database backed by the JSON file at the given
    /// path.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use callisto::db::Database;
    /// let db = Database::open_json("moons.json").unwrap();
    /// ```
    pub fn open_json(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(Box::new(JsonFileStorage::open(path)?))
    }

    /// Returns a handle onto the table with the given name.
    ///
    /// The table is created lazily: it only shows up in the storage (and in
    /// [Database::tables]) once the first mutation ran against it. Repeated
    /// calls for the same name return handles sharing one cache and one
    /// generation counter.
    pub fn table(&self, name: &str) -> Result<Table> {
        let mut tables = self.tables.lock().map_err(|_| Error::poisoned())?;
        if let Some(table) = tables.get(name) {
            return Ok(table.clone());
        }

        let table = Table::new(name.to_string(), Arc::clone(&self.storage), &self.options);
        let _ = tables.insert(name.to_string(), table.clone());

        Ok(table)
    }

    /// Returns a handle onto the default table, see
    /// [Options](crate::config::Options).
    pub fn default_table(&self) -> Result<Table> {
        let name = self.options.default_table.clone();
        self.table(&name)
    }

    /// Lists the names of all tables present in the storage, in creation
    /// order.
    pub fn tables(&self) -> Result<Vec<String>> {
        let mut guard = self.storage.lock().map_err(|_| Error::poisoned())?;
        let snapshot = (**guard).read()?.unwrap_or_default();

        Ok(snapshot.keys().cloned().collect())
    }

    /// Removes the table with the given name along with all its documents.
    ///
    /// Handles onto the table which are still around keep working but observe
    /// an empty table; asking for the name again yields a fresh one.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        log::info!("Dropping table: {}...", name);
        {
            let mut guard = self.storage.lock().map_err(|_| Error::poisoned())?;
            let storage = &mut **guard;
            let mut snapshot = storage.read()?.unwrap_or_default();
            if snapshot.remove(name).is_some() {
                storage.write(&snapshot)?;
            }
        }

        let handle = {
            let mut tables = self.tables.lock().map_err(|_| Error::poisoned())?;
            tables.remove(name)
        };
        if let Some(handle) = handle {
            handle.invalidate()?;
        }

        Ok(())
    }

    /// Removes all tables and their documents.
    pub fn drop_tables(&self) -> Result<()> {
        log::info!("Dropping all tables...");
        {
            let mut guard = self.storage.lock().map_err(|_| Error::poisoned())?;
            (**guard).write(&Snapshot::new())?;
        }

        let handles: Vec<Table> = {
            let mut tables = self.tables.lock().map_err(|_| Error::poisoned())?;
            tables.drain().map(|(_, table)| table).collect()
        };
        for handle in handles {
            handle.invalidate()?;
        }

        Ok(())
    }

    /// Closes the underlying storage, flushing everything unwritten.
    ///
    /// Closing is idempotent. Whether a table can still be used afterwards
    /// depends on the storage: file backends report
    /// [Error::StorageUnavailable], the memory backend keeps working.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.storage.lock().map_err(|_| Error::poisoned())?;
        (**guard).close()
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Database")
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(error) = self.close() {
            log::warn!("Failed to close the database storage: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::Options;
    use crate::db::Database;
    use crate::object;
    use crate::query::field;

    #[test]
    fn opening_initializes_an_empty_storage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        {
            let _db = Database::open_json(&path).unwrap();
        }
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.trim(), "{}");
    }

    #[test]
    fn handles_for_the_same_table_share_state() {
        let db = Database::memory().unwrap();
        let one = db.table("moons").unwrap();
        let two = db.table("moons").unwrap();

        let _ = one.insert(object! { "name" => "Io" }).unwrap();
        assert_eq!(two.len().unwrap(), 1);

        let _ = one.search(&field("name").equals("Io")).unwrap();
        let _ = two.search(&field("name").equals("Io")).unwrap();
        assert_eq!(two.cache_stats().unwrap().hits, 1);
    }

    #[test]
    fn the_default_table_is_configurable() {
        let db = Database::memory().unwrap();
        assert_eq!(db.default_table().unwrap().name(), "_default");

        let db = Database::open_with(
            Box::new(crate::storage::MemoryStorage::new()),
            Options::new().default_table("moons"),
        )
        .unwrap();
        assert_eq!(db.default_table().unwrap().name(), "moons");
    }

    #[test]
    fn tables_are_listed_in_creation_order() {
        let db = Database::memory().unwrap();
        assert!(db.tables().unwrap().is_empty());

        // Handles alone don't create tables...
        let planets = db.table("planets").unwrap();
        assert!(db.tables().unwrap().is_empty());

        let _ = db.table("moons").unwrap().insert(object! { "name" => "Io" }).unwrap();
        let _ = planets.insert(object! { "name" => "Jupiter" }).unwrap();
        assert_eq!(db.tables().unwrap(), vec!["moons", "planets"]);
    }

    #[test]
    fn dropped_tables_vanish_for_old_and_new_handles() {
        let db = Database::memory().unwrap();
        let stale = db.table("moons").unwrap();
        let _ = stale.insert(object! { "name" => "Io" }).unwrap();
        let _ = stale.search(&field("name").equals("Io")).unwrap();

        db.drop_table("moons").unwrap();
        assert!(db.tables().unwrap().is_empty());

        // The old handle sees the empty state instead of its cached results...
        assert!(stale.search(&field("name").equals("Io")).unwrap().is_empty());
        assert_eq!(stale.len().unwrap(), 0);

        // ...and a fresh handle starts from scratch.
        let fresh = db.table("moons").unwrap();
        assert_eq!(fresh.insert(object! { "name" => "Europa" }).unwrap(), 1);
    }

    #[test]
    fn drop_tables_clears_the_whole_database() {
        let db = Database::memory().unwrap();
        let _ = db.table("a").unwrap().insert(object! { "n" => 1 }).unwrap();
        let _ = db.table("b").unwrap().insert(object! { "n" => 2 }).unwrap();

        db.drop_tables().unwrap();
        assert!(db.tables().unwrap().is_empty());
        assert_eq!(db.table("a").unwrap().len().unwrap(), 0);
    }

    #[test]
    fn close_is_idempotent() {
        let db = Database::memory().unwrap();
        db.close().unwrap();
        db.close().unwrap();

        // The memory backend stays usable after closing...
        let _ = db.table("moons").unwrap().insert(object! { "name" => "Io" }).unwrap();
        assert_eq!(db.table("moons").unwrap().len().unwrap(), 1);
    }

    #[test]
    fn closed_file_databases_report_unavailable_storage() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_json(dir.path().join("db.json")).unwrap();
        let table = db.table("moons").unwrap();
        let _ = table.insert(object! { "name" => "Io" }).unwrap();

        db.close().unwrap();
        assert!(table.insert(object! { "name" => "Europa" }).is_err());
        assert!(table.len().is_err());
    }

    #[test]
    fn databases_persist_across_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        {
            let db = Database::open_json(&path).unwrap();
            let moons = db.table("moons").unwrap();
            let _ = moons.insert(object! { "name" => "Io", "radius_km" => 1821.6 }).unwrap();
            let _ = moons.insert(object! { "name" => "Europa" }).unwrap();
            let _ = moons.remove(None, Some(&[1])).unwrap();
            db.close().unwrap();
        }

        let db = Database::open_json(&path).unwrap();
        let moons = db.table("moons").unwrap();
        assert_eq!(moons.len().unwrap(), 1);
        assert_eq!(
            moons.get(None, Some(2)).unwrap().unwrap().get("name").unwrap().as_str(),
            Some("Europa")
        );

        // Id assignment continues behind the highest persisted id...
        assert_eq!(moons.insert(object! { "name" => "Ganymede" }).unwrap(), 3);
    }
}
