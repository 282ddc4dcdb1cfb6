//! Defines how database contents are persisted.
//!
//! A [Storage] holds exactly one [Snapshot]: the full contents of all tables.
//! The database reads the snapshot whenever it needs the current state and
//! writes the complete snapshot back after every mutation. This keeps the
//! contract minimal - a backend only has to move one value in and out - and
//! makes each mutation atomic from the caller's perspective.
//!
//! Three backends are provided: [MemoryStorage] for tests and ephemeral data,
//! [JsonFileStorage] for a single JSON file on disk and [CachingStorage],
//! a middleware which batches writes in front of any other backend.
//!
//! # Example
//!
//! ```
//! # use callisto::storage::{MemoryStorage, Snapshot, Storage, TableData};
//! # use callisto::object;
//! let mut storage = MemoryStorage::new();
//! assert!(storage.read().unwrap().is_none());
//!
//! let mut snapshot = Snapshot::new();
//! let mut rows = TableData::new();
//! rows.insert(1, object! { "name" => "Himalia" });
//! snapshot.insert("moons".to_string(), rows);
//!
//! storage.write(&snapshot).unwrap();
//! assert_eq!(storage.read().unwrap().unwrap()["moons"][&1]["name"].as_str(), Some("Himalia"));
//! ```
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;

use linked_hash_map::LinkedHashMap;

use crate::docs::{object_from_json, object_to_json, DocId, Object};
use crate::error::{Error, Result};

/// The documents of a single table, keyed by their ids in insertion order.
pub type TableData = LinkedHashMap<DocId, Object>;

/// The complete persisted state: every table with all of its documents.
pub type Snapshot = LinkedHashMap<String, TableData>;

/// Moves database snapshots in and out of a backend.
///
/// Implementations don't need to be clever: `read` yields the last written
/// snapshot (or `None` if nothing has ever been written), `write` replaces it
/// entirely. `close` releases held resources and MUST tolerate being called
/// more than once; the default implementation does nothing.
pub trait Storage: Send {
    /// Reads the current snapshot, or `None` if the backend is still empty.
    ///
    /// An empty backend is not an error: the owning database reacts by
    /// writing an empty snapshot.
    fn read(&mut self) -> Result<Option<Snapshot>>;

    /// Replaces the persisted state with the given snapshot.
    fn write(&mut self, snapshot: &Snapshot) -> Result<()>;

    /// Releases all resources held by this backend. Must be idempotent.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Keeps the snapshot in memory, for tests and ephemeral databases.
#[derive(Default)]
pub struct MemoryStorage {
    snapshot: Option<Snapshot>,
}

impl MemoryStorage {
    /// Creates an empty in-memory storage.
    pub fn new() -> Self {
        MemoryStorage::default()
    }
}

impl Storage for MemoryStorage {
    fn read(&mut self) -> Result<Option<Snapshot>> {
        Ok(self.snapshot.clone())
    }

    fn write(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }
}

/// Persists the snapshot as a single JSON file.
///
/// The on-disk layout is one object per table, keyed by the decimal string
/// form of each document id:
///
/// ```json
/// { "moons": { "1": { "name": "Io" }, "2": { "name": "Europa" } } }
/// ```
///
/// Opening creates the file if it is missing; a file of length zero reads as
/// "nothing stored yet". Every write serializes the whole snapshot, syncs it
/// to disk and truncates the file to the written length, so the file is never
/// left with trailing garbage from a previously larger state. Combine with
/// [CachingStorage] when many small mutations would cause excessive disk
/// traffic.
pub struct JsonFileStorage {
    path: PathBuf,
    file: Option<File>,
}

impl JsonFileStorage {
    /// Opens (or creates) the database file at the given path.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        log::info!("Opened database file {}...", path.display());

        Ok(JsonFileStorage {
            path,
            file: Some(file),
        })
    }

    fn file(&mut self) -> Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| Error::storage("the storage has been closed"))
    }
}

impl Storage for JsonFileStorage {
    fn read(&mut self) -> Result<Option<Snapshot>> {
        let path = self.path.clone();
        let file = self.file()?;

        let len = file.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Ok(None);
        }

        let _ = file.seek(SeekFrom::Start(0))?;
        let mut data = String::new();
        let _ = file.read_to_string(&mut data)?;

        let json: serde_json::Value = serde_json::from_str(&data).map_err(|error| {
            Error::InvalidDocument(format!(
                "malformed database file {}: {}",
                path.display(),
                error
            ))
        })?;

        snapshot_from_json(&json).map(Some)
    }

    fn write(&mut self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_string(&snapshot_to_json(snapshot)).map_err(Error::storage)?;

        let file = self.file()?;
        let _ = file.seek(SeekFrom::Start(0))?;
        file.write_all(data.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        // Shrink the file in case the previous snapshot was larger...
        file.set_len(data.len() as u64)?;

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.file.take().is_some() {
            log::debug!("Closed database file {}...", self.path.display());
        }

        Ok(())
    }
}

/// Transforms a snapshot into its JSON representation.
///
/// This is the format [JsonFileStorage] writes; it is public so that custom
/// backends (sockets, object stores, ...) can reuse it.
pub fn snapshot_to_json(snapshot: &Snapshot) -> serde_json::Value {
    let mut tables = serde_json::Map::new();
    for (name, data) in snapshot {
        let mut docs = serde_json::Map::new();
        for (id, fields) in data {
            let _ = docs.insert(id.to_string(), object_to_json(fields));
        }
        let _ = tables.insert(name.clone(), serde_json::Value::Object(docs));
    }

    serde_json::Value::Object(tables)
}

/// Parses a snapshot from its JSON representation.
///
/// # Errors
/// Fails with [Error::InvalidDocument] if the JSON doesn't have the expected
/// shape (an object of tables, each an object of documents keyed by positive
/// decimal ids).
pub fn snapshot_from_json(json: &serde_json::Value) -> Result<Snapshot> {
    let tables = json
        .as_object()
        .ok_or_else(|| Error::InvalidDocument("expected an object of tables".to_string()))?;

    let mut snapshot = Snapshot::new();
    for (name, docs) in tables {
        let docs = docs.as_object().ok_or_else(|| {
            Error::InvalidDocument(format!("table {:?} is not an object", name))
        })?;

        let mut data = TableData::new();
        for (id, fields) in docs {
            let id: DocId = id.parse().ok().filter(|id| *id != 0).ok_or_else(|| {
                Error::InvalidDocument(format!("invalid document id {:?} in table {:?}", id, name))
            })?;
            let _ = data.insert(id, object_from_json(fields)?);
        }
        let _ = snapshot.insert(name.clone(), data);
    }

    Ok(snapshot)
}

/// The number of writes buffered by a [CachingStorage] before it flushes.
const WRITE_CACHE_SIZE: usize = 1000;

/// A write-back middleware in front of another storage.
///
/// Reads are served from the last written snapshot, writes only update the
/// in-memory copy and are flushed to the inner backend every
/// 1000 writes, on [CachingStorage::flush], on close and on drop. Use this to
/// keep mutation-heavy workloads from hitting the disk on every call - at the
/// price that a crash loses the unflushed tail.
pub struct CachingStorage<S: Storage> {
    inner: S,
    cache: Option<Snapshot>,
    unflushed: usize,
}

impl<S: Storage> CachingStorage<S> {
    /// Wraps the given backend.
    pub fn new(inner: S) -> Self {
        CachingStorage {
            inner,
            cache: None,
            unflushed: 0,
        }
    }

    /// Forces all buffered writes down into the inner backend.
    pub fn flush(&mut self) -> Result<()> {
        if self.unflushed > 0 {
            if let Some(snapshot) = &self.cache {
                self.inner.write(snapshot)?;
            }
            log::debug!("Flushed {} buffered writes...", self.unflushed);
            self.unflushed = 0;
        }

        Ok(())
    }
}

impl<S: Storage> Storage for CachingStorage<S> {
    fn read(&mut self) -> Result<Option<Snapshot>> {
        if let Some(snapshot) = &self.cache {
            return Ok(Some(snapshot.clone()));
        }

        let loaded = self.inner.read()?;
        self.cache = loaded.clone();

        Ok(loaded)
    }

    fn write(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.cache = Some(snapshot.clone());
        self.unflushed += 1;
        if self.unflushed >= WRITE_CACHE_SIZE {
            self.flush()?;
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.inner.close()
    }
}

impl<S: Storage> Drop for CachingStorage<S> {
    fn drop(&mut self) {
        if let Err(error) = self.flush() {
            log::warn!("Failed to flush buffered writes on drop: {}", error);
        }
    }
}
