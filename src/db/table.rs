//! Implements tables: the executor for all queries and mutations.
//!
//! A [Table] is a cheap cloneable handle onto one named collection of
//! documents. It owns no document data itself: every read loads the current
//! snapshot from the shared storage and every mutation performs a
//! read-modify-write of that snapshot under the storage lock, which makes each
//! operation atomic. A failing mutation (an unknown id, a conflicting insert)
//! aborts before anything is written, so the table never ends up half-changed.
//!
//! Each successful mutation advances the generation counter by exactly one -
//! also for batch operations like [Table::insert_multiple]. The generation
//! tags cached query results, see [crate::db::cache].
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use fnv::FnvHashSet;

use crate::config::Options;
use crate::db::cache::{CacheStats, QueryCache};
use crate::docs::{DocId, Document, Object};
use crate::error::{Error, Result};
use crate::query::Predicate;
use crate::storage::{Storage, TableData};

/// The storage shared by all tables of a database.
pub(crate) type SharedStorage = Arc<Mutex<Box<dyn Storage>>>;

/// Describes the effect of a mutation, as consumed by the query cache.
pub(crate) enum Change {
    /// Documents were appended to the end of the table.
    Inserted(Vec<Document>),

    /// Existing documents now have the contained contents.
    Updated(Vec<Document>),

    /// The documents with the given ids are gone.
    Removed(FnvHashSet<DocId>),

    /// The whole table was cleared.
    Cleared,
}

/// The change applied to each selected document by [Table::update].
///
/// A mutation is either a set of fields to merge into the document
/// (insert-or-overwrite per key) or an arbitrary transform function. The
/// [ops](crate::ops) module provides ready-made mutations for common cases
/// like incrementing a counter or deleting a field.
#[derive(Clone)]
pub enum Mutation {
    /// Merges the given fields into each selected document.
    Fields(Object),

    /// Applies the given function to the fields of each selected document.
    Transform(Arc<dyn Fn(&mut Object) + Send + Sync>),
}

impl Mutation {
    /// Wraps a transform function into a mutation.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::db::{Database, Mutation};
    /// # use callisto::docs::Value;
    /// # use callisto::object;
    /// # let db = Database::memory().unwrap();
    /// # let table = db.table("crew").unwrap();
    /// # table.insert(object! { "name" => "lowercase name" }).unwrap();
    /// let uppercase = Mutation::transform(|fields| {
    ///     if let Some(Value::Str(name)) = fields.get_mut("name") {
    ///         *name = name.to_uppercase();
    ///     }
    /// });
    /// table.update(uppercase, None, None).unwrap();
    /// ```
    pub fn transform<F>(fun: F) -> Self
    where
        F: Fn(&mut Object) + Send + Sync + 'static,
    {
        Mutation::Transform(Arc::new(fun))
    }

    /// Applies this mutation to the given document fields.
    pub(crate) fn apply(&self, fields: &mut Object) {
        match self {
            Mutation::Fields(updates) => {
                for (key, value) in updates {
                    // Overwrite in place to keep the field order stable...
                    if let Some(slot) = fields.get_mut(key) {
                        *slot = value.clone();
                    } else {
                        let _ = fields.insert(key.clone(), value.clone());
                    }
                }
            }
            Mutation::Transform(fun) => fun(fields),
        }
    }
}

impl From<Object> for Mutation {
    fn from(fields: Object) -> Self {
        Mutation::Fields(fields)
    }
}

impl fmt::Debug for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Mutation::Fields(fields) => f.debug_tuple("Fields").field(fields).finish(),
            Mutation::Transform(_) => f.write_str("Transform(..)"),
        }
    }
}

/// A handle onto one table of a [Database](crate::db::Database).
///
/// Handles are cheap to clone; all handles for the same table share one query
/// cache and one generation counter. All operations are synchronous and each
/// one is atomic - there is no transaction which spans several calls.
#[derive(Clone)]
pub struct Table {
    name: String,
    storage: SharedStorage,
    cache: Arc<Mutex<QueryCache>>,
    generation: Arc<AtomicU64>,
}

impl Table {
    /// Creates a handle for the given table name on the given storage.
    pub(crate) fn new(name: String, storage: SharedStorage, options: &Options) -> Self {
        Table {
            name,
            storage,
            cache: Arc::new(Mutex::new(QueryCache::new(
                options.cache_capacity,
                options.cache_strategy,
            ))),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the name of this table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current generation of this table.
    ///
    /// The generation advances by exactly one for each successful mutating
    /// call, no matter how many documents the call touched.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Relaxed)
    }

    /// Reads the current table data along with the generation it belongs to.
    fn read_data(&self) -> Result<(TableData, u64)> {
        let mut guard = self.storage.lock().map_err(|_| Error::poisoned())?;
        let snapshot = (**guard).read()?;
        let data = snapshot
            .and_then(|mut snapshot| snapshot.remove(&self.name))
            .unwrap_or_default();
        // Loaded while still holding the storage lock, so the pair is
        // consistent...
        let generation = self.generation.load(Ordering::Relaxed);

        Ok((data, generation))
    }

    /// Runs a mutation through the pipeline: read the snapshot, let the
    /// updater change the table data, write everything back, advance the
    /// generation and inform the cache. If the updater fails, nothing is
    /// written and the generation keeps its value.
    fn update_table<T>(
        &self,
        updater: impl FnOnce(&mut TableData) -> Result<(Change, T)>,
    ) -> Result<T> {
        let (change, result, generation) = {
            let mut guard = self.storage.lock().map_err(|_| Error::poisoned())?;
            let storage = &mut **guard;

            let mut snapshot = storage.read()?.unwrap_or_default();
            let data = snapshot
                .entry(self.name.clone())
                .or_insert_with(TableData::new);
            let (change, result) = updater(data)?;

            storage.write(&snapshot)?;
            let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;

            (change, result, generation)
        };

        let mut cache = self.cache.lock().map_err(|_| Error::poisoned())?;
        cache.apply(&change, generation);

        Ok(result)
    }

    /// Returns the number of documents in this table.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_data()?.0.len())
    }

    /// Determines if this table contains no documents.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Returns all documents in insertion order.
    ///
    /// Like [Table::search], the result is a snapshot copy: later mutations
    /// never alter an already returned vector.
    pub fn all(&self) -> Result<Vec<Document>> {
        self.search(&Predicate::always())
    }

    /// Returns all documents matching the given predicate, in table order.
    ///
    /// Results are served from the query cache whenever the same predicate
    /// (by structure, not by instance) was already evaluated at the current
    /// generation.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::db::Database;
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let db = Database::memory().unwrap();
    /// let table = db.table("moons").unwrap();
    /// table.insert(object! { "name" => "Io", "radius_km" => 1821.6 }).unwrap();
    /// table.insert(object! { "name" => "Europa", "radius_km" => 1560.8 }).unwrap();
    ///
    /// let large = table.search(&field("radius_km").greater_than(1600)).unwrap();
    /// assert_eq!(large.len(), 1);
    /// assert_eq!(large[0].get("name").unwrap().as_str(), Some("Io"));
    /// ```
    pub fn search(&self, cond: &Predicate) -> Result<Vec<Document>> {
        let generation = self.generation.load(Ordering::Relaxed);
        {
            let mut cache = self.cache.lock().map_err(|_| Error::poisoned())?;
            if let Some(results) = cache.get(cond.key(), generation) {
                return Ok(results);
            }
        }

        let (data, generation) = self.read_data()?;
        let results: Vec<Document> = data
            .iter()
            .filter(|(_, fields)| cond.matches(fields))
            .map(|(id, fields)| Document::new(*id, fields.clone()))
            .collect();

        let mut cache = self.cache.lock().map_err(|_| Error::poisoned())?;
        cache.put(cond, results.clone(), generation);

        Ok(results)
    }

    /// Returns the number of documents matching the given predicate.
    pub fn count(&self, cond: &Predicate) -> Result<usize> {
        Ok(self.search(cond)?.len())
    }

    /// Fetches a single document, either the first one matching the condition
    /// or the one with the given id.
    ///
    /// Exactly one selector must be given. This bypasses the query cache and
    /// stops at the first match.
    ///
    /// # Errors
    /// Fails with [Error::InvalidQuery] if both or neither selector is given.
    pub fn get(&self, cond: Option<&Predicate>, id: Option<DocId>) -> Result<Option<Document>> {
        match (cond, id) {
            (Some(cond), None) => {
                let (data, _) = self.read_data()?;
                Ok(data
                    .iter()
                    .find(|(_, fields)| cond.matches(fields))
                    .map(|(id, fields)| Document::new(*id, fields.clone())))
            }
            (None, Some(id)) => {
                let (data, _) = self.read_data()?;
                Ok(data
                    .get(&id)
                    .map(|fields| Document::new(id, fields.clone())))
            }
            (Some(_), Some(_)) => Err(Error::InvalidQuery(
                "either a condition or a document id may be given, not both".to_string(),
            )),
            (None, None) => Err(Error::InvalidQuery(
                "either a condition or a document id is required".to_string(),
            )),
        }
    }

    /// Determines if a document matching the condition (or carrying the given
    /// id) exists. The selector rules of [Table::get] apply.
    pub fn contains(&self, cond: Option<&Predicate>, id: Option<DocId>) -> Result<bool> {
        Ok(self.get(cond, id)?.is_some())
    }

    /// Returns an iterator over a fresh snapshot of all documents.
    ///
    /// Each call starts over from the then-current state; an iterator obtained
    /// earlier is unaffected by later mutations.
    pub fn iter(&self) -> Result<TableIter> {
        let (data, _) = self.read_data()?;
        let docs: Vec<Document> = data
            .into_iter()
            .map(|(id, fields)| Document::new(id, fields))
            .collect();

        Ok(TableIter {
            docs: docs.into_iter(),
        })
    }

    /// Inserts the given fields as a new document and returns its id.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::db::Database;
    /// # use callisto::object;
    /// let db = Database::memory().unwrap();
    /// let table = db.table("moons").unwrap();
    ///
    /// assert_eq!(table.insert(object! { "name" => "Io" }).unwrap(), 1);
    /// assert_eq!(table.insert(object! { "name" => "Europa" }).unwrap(), 2);
    /// ```
    pub fn insert(&self, fields: Object) -> Result<DocId> {
        self.update_table(move |data| {
            let id = next_id(data);
            let _ = data.insert(id, fields.clone());

            Ok((Change::Inserted(vec![Document::new(id, fields)]), id))
        })
    }

    /// Inserts the given fields under exactly the given id.
    ///
    /// # Errors
    /// Fails with [Error::IdConflict] if a document with this id already
    /// exists and with [Error::InvalidDocument] for the id 0, which is
    /// reserved.
    pub fn insert_with_id(&self, id: DocId, fields: Object) -> Result<DocId> {
        if id == 0 {
            return Err(Error::InvalidDocument(
                "document ids must be positive".to_string(),
            ));
        }

        self.update_table(move |data| {
            if data.contains_key(&id) {
                return Err(Error::IdConflict(id));
            }
            let _ = data.insert(id, fields.clone());

            Ok((Change::Inserted(vec![Document::new(id, fields)]), id))
        })
    }

    /// Inserts several documents in one mutation and returns their ids.
    ///
    /// The whole batch advances the generation once and is written in one
    /// storage round trip.
    pub fn insert_multiple(&self, docs: Vec<Object>) -> Result<Vec<DocId>> {
        self.update_table(move |data| {
            let mut id = next_id(data);
            let mut ids = Vec::with_capacity(docs.len());
            let mut inserted = Vec::with_capacity(docs.len());

            for fields in docs {
                let _ = data.insert(id, fields.clone());
                inserted.push(Document::new(id, fields));
                ids.push(id);
                id += 1;
            }

            Ok((Change::Inserted(inserted), ids))
        })
    }

    /// Applies a [Mutation] to a selection of documents and returns the ids of
    /// all updated documents.
    ///
    /// The selection is either a condition, an explicit list of ids or - when
    /// neither is given - every document of the table.
    ///
    /// # Errors
    /// Fails with [Error::InvalidQuery] if both a condition and ids are given
    /// or if one of the given ids doesn't exist; in the latter case the table
    /// remains completely unchanged.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::db::Database;
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let db = Database::memory().unwrap();
    /// let table = db.table("moons").unwrap();
    /// table.insert(object! { "name" => "Io", "visited" => false }).unwrap();
    ///
    /// let updated = table
    ///     .update(object! { "visited" => true }, Some(&field("name").equals("Io")), None)
    ///     .unwrap();
    /// assert_eq!(updated, vec![1]);
    /// ```
    pub fn update(
        &self,
        mutation: impl Into<Mutation>,
        cond: Option<&Predicate>,
        ids: Option<&[DocId]>,
    ) -> Result<Vec<DocId>> {
        let mutation = mutation.into();

        match (cond, ids) {
            (Some(_), Some(_)) => Err(Error::InvalidQuery(
                "a condition and explicit ids are mutually exclusive".to_string(),
            )),
            (None, Some(ids)) => {
                let ids = ids.to_vec();
                self.update_table(move |data| {
                    for id in &ids {
                        if !data.contains_key(id) {
                            return Err(Error::InvalidQuery(format!("no document with id {}", id)));
                        }
                    }

                    let change = apply_mutation(data, &mutation, &ids);
                    Ok((change, ids))
                })
            }
            (Some(cond), None) => {
                let cond = cond.clone();
                self.update_table(move |data| {
                    let targets = matching_ids(data, &cond);
                    let change = apply_mutation(data, &mutation, &targets);
                    Ok((change, targets))
                })
            }
            (None, None) => self.update_table(move |data| {
                let targets: Vec<DocId> = data.keys().copied().collect();
                let change = apply_mutation(data, &mutation, &targets);
                Ok((change, targets))
            }),
        }
    }

    /// Performs several condition/mutation pairs in one mutation pass.
    ///
    /// All pairs observe the same starting point regarding the generation and
    /// cache handling: the whole pass advances the generation once. Returns
    /// the ids of all updated documents (a document updated by several pairs
    /// appears once per pair).
    pub fn update_multiple(&self, updates: Vec<(Mutation, Predicate)>) -> Result<Vec<DocId>> {
        self.update_table(move |data| {
            let mut ids = Vec::new();
            for (mutation, cond) in &updates {
                let targets = matching_ids(data, cond);
                for id in &targets {
                    if let Some(fields) = data.get_mut(id) {
                        mutation.apply(fields);
                    }
                }
                ids.extend(targets);
            }

            // Collect the final state of each touched document once...
            let mut seen = FnvHashSet::default();
            let mut updated = Vec::new();
            for id in &ids {
                if seen.insert(*id) {
                    if let Some(fields) = data.get(id) {
                        updated.push(Document::new(*id, fields.clone()));
                    }
                }
            }

            Ok((Change::Updated(updated), ids))
        })
    }

    /// Updates all documents matching the condition by merging in the given
    /// fields, or inserts the fields as a new document if nothing matches.
    /// Returns the ids of the affected documents.
    ///
    /// # Example
    ///
    /// ```
    /// # use callisto::db::Database;
    /// # use callisto::query::field;
    /// # use callisto::object;
    /// let db = Database::memory().unwrap();
    /// let table = db.table("counters").unwrap();
    ///
    /// let by_name = field("name").equals("visits");
    /// // Nothing matches, so this inserts...
    /// assert_eq!(table.upsert(object! { "name" => "visits", "value" => 1 }, &by_name).unwrap(), vec![1]);
    /// // ...and this updates the very same document.
    /// assert_eq!(table.upsert(object! { "name" => "visits", "value" => 2 }, &by_name).unwrap(), vec![1]);
    /// assert_eq!(table.len().unwrap(), 1);
    /// ```
    pub fn upsert(&self, fields: Object, cond: &Predicate) -> Result<Vec<DocId>> {
        let cond = cond.clone();
        self.update_table(move |data| {
            let targets = matching_ids(data, &cond);
            if targets.is_empty() {
                let id = next_id(data);
                let _ = data.insert(id, fields.clone());
                return Ok((Change::Inserted(vec![Document::new(id, fields)]), vec![id]));
            }

            let mutation = Mutation::Fields(fields);
            let change = apply_mutation(data, &mutation, &targets);
            Ok((change, targets))
        })
    }

    /// Updates the document with the given id by merging in the given fields,
    /// or inserts them under exactly this id if it is still free.
    pub fn upsert_by_id(&self, id: DocId, fields: Object) -> Result<Vec<DocId>> {
        if id == 0 {
            return Err(Error::InvalidDocument(
                "document ids must be positive".to_string(),
            ));
        }

        self.update_table(move |data| {
            if let Some(existing) = data.get_mut(&id) {
                Mutation::Fields(fields).apply(existing);
                let updated = Document::new(id, existing.clone());
                Ok((Change::Updated(vec![updated]), vec![id]))
            } else {
                let _ = data.insert(id, fields.clone());
                Ok((Change::Inserted(vec![Document::new(id, fields)]), vec![id]))
            }
        })
    }

    /// Removes documents and returns their ids.
    ///
    /// When ids are given they determine the selection - also if a condition
    /// is given as well. Without any selector this refuses to run, as clearing
    /// a table shouldn't happen by accident; use [Table::truncate] for that.
    ///
    /// # Errors
    /// Fails with [Error::InvalidQuery] without any selector or if one of the
    /// given ids doesn't exist; in the latter case nothing is removed.
    pub fn remove(&self, cond: Option<&Predicate>, ids: Option<&[DocId]>) -> Result<Vec<DocId>> {
        match (cond, ids) {
            (None, None) => Err(Error::InvalidQuery(
                "refusing to remove all documents without a condition or ids; use truncate instead"
                    .to_string(),
            )),
            (_, Some(ids)) => {
                let ids = ids.to_vec();
                self.update_table(move |data| {
                    for id in &ids {
                        if !data.contains_key(id) {
                            return Err(Error::InvalidQuery(format!("no document with id {}", id)));
                        }
                    }

                    let mut removed = FnvHashSet::default();
                    for id in &ids {
                        if data.remove(id).is_some() {
                            let _ = removed.insert(*id);
                        }
                    }

                    Ok((Change::Removed(removed), ids))
                })
            }
            (Some(cond), None) => {
                let cond = cond.clone();
                self.update_table(move |data| {
                    let targets = matching_ids(data, &cond);
                    let mut removed = FnvHashSet::default();
                    for id in &targets {
                        let _ = data.remove(id);
                        let _ = removed.insert(*id);
                    }

                    Ok((Change::Removed(removed), targets))
                })
            }
        }
    }

    /// Removes all documents.
    ///
    /// This also resets id assignment: the next inserted document receives
    /// the id 1 again.
    pub fn truncate(&self) -> Result<()> {
        self.update_table(|data| {
            data.clear();
            Ok((Change::Cleared, ()))
        })
    }

    /// Removes all cached query results and resets the cache statistics.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache.lock().map_err(|_| Error::poisoned())?.flush();
        Ok(())
    }

    /// Reports the usage statistics of the query cache.
    pub fn cache_stats(&self) -> Result<CacheStats> {
        Ok(self.cache.lock().map_err(|_| Error::poisoned())?.stats())
    }

    /// Invalidates this handle after its table was dropped behind its back:
    /// cached results are flushed and the generation advances so that every
    /// clone notices the new (empty) state.
    pub(crate) fn invalidate(&self) -> Result<()> {
        let _ = self.generation.fetch_add(1, Ordering::Relaxed);
        self.cache.lock().map_err(|_| Error::poisoned())?.flush();
        Ok(())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("generation", &self.generation())
            .finish()
    }
}

/// Determines the id for the next inserted document: the highest existing id
/// plus one, or 1 for an empty table.
fn next_id(data: &TableData) -> DocId {
    data.keys().max().map(|max| max + 1).unwrap_or(1)
}

/// Collects the ids of all documents matching the condition, in table order.
fn matching_ids(data: &TableData, cond: &Predicate) -> Vec<DocId> {
    data.iter()
        .filter(|(_, fields)| cond.matches(fields))
        .map(|(id, _)| *id)
        .collect()
}

/// Applies the mutation to the documents with the given ids and describes the
/// change. Ids must have been validated by the caller.
fn apply_mutation(data: &mut TableData, mutation: &Mutation, ids: &[DocId]) -> Change {
    let mut updated = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(fields) = data.get_mut(id) {
            mutation.apply(fields);
            updated.push(Document::new(*id, fields.clone()));
        }
    }

    Change::Updated(updated)
}

/// Iterates over the snapshot a table had when [Table::iter] was called.
pub struct TableIter {
    docs: std::vec::IntoIter<Document>,
}

impl Iterator for TableIter {
    type Item = Document;

    fn next(&mut self) -> Option<Self::Item> {
        self.docs.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.docs.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::{CacheStrategy, Options};
    use crate::db::table::{next_id, SharedStorage, Table};
    use crate::db::Mutation;
    use crate::docs::{DocId, Document, Value};
    use crate::error::Error;
    use crate::query::{field, Predicate};
    use crate::storage::MemoryStorage;
    use crate::object;
    use std::sync::{Arc, Mutex};

    fn table_with(options: Options) -> Table {
        let storage: SharedStorage = Arc::new(Mutex::new(Box::new(MemoryStorage::new())));
        Table::new("test".to_string(), storage, &options)
    }

    fn table() -> Table {
        table_with(Options::new())
    }

    fn names(docs: &[Document]) -> Vec<&str> {
        docs.iter()
            .filter_map(|doc| doc.get("name").and_then(Value::as_str))
            .collect()
    }

    fn seed_moons(table: &Table) {
        let _ = table
            .insert_multiple(vec![
                object! { "name" => "Io", "radius_km" => 1821.6, "active" => true },
                object! { "name" => "Europa", "radius_km" => 1560.8, "active" => false },
                object! { "name" => "Ganymede", "radius_km" => 2634.1, "active" => false },
            ])
            .unwrap();
    }

    #[test]
    fn inserts_assign_sequential_ids() {
        let table = table();
        assert_eq!(table.insert(object! { "name" => "Io" }).unwrap(), 1);
        assert_eq!(table.insert(object! { "name" => "Europa" }).unwrap(), 2);
        assert_eq!(table.insert(object! { "name" => "Ganymede" }).unwrap(), 3);
        assert_eq!(table.len().unwrap(), 3);

        let all = table.all().unwrap();
        assert_eq!(names(&all), vec!["Io", "Europa", "Ganymede"]);
        assert_eq!(all.iter().map(Document::id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn insert_search_update_search() {
        let table = table();
        seed_moons(&table);

        let large = field("radius_km").greater_than(1600);
        assert_eq!(names(&table.search(&large).unwrap()), vec!["Io", "Ganymede"]);

        let updated = table
            .update(object! { "radius_km" => 1000 }, Some(&field("name").equals("Io")), None)
            .unwrap();
        assert_eq!(updated, vec![1]);

        // The same predicate now sees the new state...
        assert_eq!(names(&table.search(&large).unwrap()), vec!["Ganymede"]);
    }

    #[test]
    fn insert_with_id_enforces_conflicts_and_positive_ids() {
        let table = table();
        assert_eq!(table.insert_with_id(7, object! { "x" => 1 }).unwrap(), 7);

        match table.insert_with_id(7, object! { "x" => 2 }) {
            Err(Error::IdConflict(7)) => (),
            other => panic!("expected an id conflict but found: {:?}", other),
        }
        assert!(table.insert_with_id(0, object! {}).is_err());

        // The failed inserts have not touched the table...
        assert_eq!(table.len().unwrap(), 1);
        assert_eq!(table.generation(), 1);

        // Continuing after an explicit id picks up behind it...
        assert_eq!(table.insert(object! { "x" => 3 }).unwrap(), 8);
    }

    #[test]
    fn insert_multiple_is_one_mutation() {
        let table = table();
        let ids = table
            .insert_multiple(vec![object! { "n" => 1 }, object! { "n" => 2 }, object! { "n" => 3 }])
            .unwrap();

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn get_and_contains_demand_exactly_one_selector() {
        let table = table();
        seed_moons(&table);

        let by_name = field("name").equals("Europa");
        assert_eq!(table.get(Some(&by_name), None).unwrap().unwrap().id(), 2);
        assert_eq!(
            table
                .get(None, Some(3))
                .unwrap()
                .unwrap()
                .get("name")
                .and_then(Value::as_str),
            Some("Ganymede")
        );
        assert!(table.get(None, Some(42)).unwrap().is_none());
        assert!(table.get(Some(&by_name), Some(1)).is_err());
        assert!(table.get(None, None).is_err());

        assert!(table.contains(Some(&field("active").equals(true)), None).unwrap());
        assert!(!table.contains(None, Some(404)).unwrap());
        assert!(table.contains(None, None).is_err());
    }

    #[test]
    fn get_returns_the_first_match_in_table_order() {
        let table = table();
        seed_moons(&table);

        let inactive = field("active").equals(false);
        assert_eq!(
            table
                .get(Some(&inactive), None)
                .unwrap()
                .unwrap()
                .get("name")
                .and_then(Value::as_str),
            Some("Europa")
        );
    }

    #[test]
    fn count_matches_search() {
        let table = table();
        seed_moons(&table);

        let large = field("radius_km").greater_than(1600);
        assert_eq!(table.count(&large).unwrap(), 2);
        assert_eq!(table.count(&field("name").equals("Pluto")).unwrap(), 0);
    }

    #[test]
    fn update_without_selectors_touches_everything() {
        let table = table();
        seed_moons(&table);

        let updated = table.update(object! { "checked" => true }, None, None).unwrap();
        assert_eq!(updated, vec![1, 2, 3]);
        assert_eq!(table.count(&field("checked").equals(true)).unwrap(), 3);
    }

    #[test]
    fn update_rejects_both_selectors() {
        let table = table();
        seed_moons(&table);

        let result = table.update(
            object! { "x" => 1 },
            Some(&field("name").equals("Io")),
            Some(&[1]),
        );
        assert!(result.is_err());
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn update_by_unknown_id_aborts_without_changes() {
        let table = table();
        seed_moons(&table);

        let result = table.update(object! { "checked" => true }, None, Some(&[1, 42]));
        assert!(result.is_err());

        // Nothing was written, also not for the existing id 1...
        assert_eq!(table.count(&field("checked").exists()).unwrap(), 0);
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn update_preserves_order_and_identity() {
        let table = table();
        seed_moons(&table);

        let _ = table
            .update(object! { "active" => true }, None, Some(&[2]))
            .unwrap();

        let all = table.all().unwrap();
        assert_eq!(names(&all), vec!["Io", "Europa", "Ganymede"]);
        assert_eq!(all[1].id(), 2);
        assert_eq!(all[1].get("active"), Some(&Value::Bool(true)));
    }

    #[test]
    fn update_with_transforms() {
        let table = table();
        seed_moons(&table);

        let double = Mutation::transform(|fields| {
            if let Some(Value::Float(radius)) = fields.get_mut("radius_km") {
                *radius *= 2.0;
            }
        });
        let _ = table
            .update(double, Some(&field("name").equals("Europa")), None)
            .unwrap();

        assert_eq!(
            table
                .get(None, Some(2))
                .unwrap()
                .unwrap()
                .get("radius_km")
                .and_then(Value::as_float),
            Some(3121.6)
        );
    }

    #[test]
    fn update_multiple_runs_all_pairs_in_one_pass() {
        let table = table();
        seed_moons(&table);

        let ids = table
            .update_multiple(vec![
                (
                    Mutation::from(object! { "kind" => "volcanic" }),
                    field("active").equals(true),
                ),
                (
                    Mutation::from(object! { "kind" => "icy" }),
                    field("active").equals(false),
                ),
            ])
            .unwrap();

        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(table.generation(), 2);
        assert_eq!(table.count(&field("kind").equals("icy")).unwrap(), 2);
    }

    #[test]
    fn upsert_updates_or_inserts() {
        let table = table();
        seed_moons(&table);

        let by_name = field("name").equals("Io");
        assert_eq!(
            table.upsert(object! { "name" => "Io", "visited" => true }, &by_name).unwrap(),
            vec![1]
        );
        assert_eq!(table.len().unwrap(), 3);

        let new_moon = field("name").equals("Callisto");
        assert_eq!(
            table.upsert(object! { "name" => "Callisto" }, &new_moon).unwrap(),
            vec![4]
        );
        assert_eq!(table.len().unwrap(), 4);
    }

    #[test]
    fn upsert_by_id_updates_or_inserts_under_that_id() {
        let table = table();

        assert_eq!(table.upsert_by_id(5, object! { "n" => 1 }).unwrap(), vec![5]);
        assert_eq!(table.upsert_by_id(5, object! { "n" => 2 }).unwrap(), vec![5]);
        assert_eq!(table.len().unwrap(), 1);
        assert_eq!(
            table.get(None, Some(5)).unwrap().unwrap().get("n"),
            Some(&Value::Int(2))
        );
        assert!(table.upsert_by_id(0, object! {}).is_err());
    }

    #[test]
    fn remove_by_condition_and_by_ids() {
        let table = table();
        seed_moons(&table);

        assert_eq!(
            table.remove(Some(&field("active").equals(false)), None).unwrap(),
            vec![2, 3]
        );
        assert_eq!(names(&table.all().unwrap()), vec!["Io"]);

        assert_eq!(table.remove(None, Some(&[1])).unwrap(), vec![1]);
        assert!(table.is_empty().unwrap());
    }

    #[test]
    fn remove_prefers_ids_over_a_condition() {
        let table = table();
        seed_moons(&table);

        // Ids win: the condition would select documents 2 and 3...
        let removed = table
            .remove(Some(&field("active").equals(false)), Some(&[1]))
            .unwrap();
        assert_eq!(removed, vec![1]);
        assert_eq!(names(&table.all().unwrap()), vec!["Europa", "Ganymede"]);
    }

    #[test]
    fn remove_refuses_to_run_blind_and_aborts_on_unknown_ids() {
        let table = table();
        seed_moons(&table);

        assert!(table.remove(None, None).is_err());
        assert!(table.remove(None, Some(&[2, 42])).is_err());
        assert_eq!(table.len().unwrap(), 3);
        assert_eq!(table.generation(), 1);
    }

    #[test]
    fn truncate_clears_and_resets_ids() {
        let table = table();
        seed_moons(&table);

        table.truncate().unwrap();
        assert!(table.is_empty().unwrap());
        assert_eq!(table.insert(object! { "name" => "Amalthea" }).unwrap(), 1);
    }

    #[test]
    fn freed_top_ids_are_reassigned() {
        let table = table();
        assert_eq!(table.insert(object! { "n" => 1 }).unwrap(), 1);
        assert_eq!(table.insert(object! { "n" => 2 }).unwrap(), 2);

        let _ = table.remove(None, Some(&[2])).unwrap();
        assert_eq!(table.insert(object! { "n" => 3 }).unwrap(), 2);
    }

    #[test]
    fn generations_advance_once_per_mutating_call() {
        let table = table();
        assert_eq!(table.generation(), 0);

        let _ = table.insert(object! { "n" => 1 }).unwrap();
        assert_eq!(table.generation(), 1);

        let _ = table
            .insert_multiple(vec![object! { "n" => 2 }, object! { "n" => 3 }])
            .unwrap();
        assert_eq!(table.generation(), 2);

        let _ = table.update(object! { "seen" => true }, None, None).unwrap();
        assert_eq!(table.generation(), 3);

        let _ = table.remove(None, Some(&[1])).unwrap();
        assert_eq!(table.generation(), 4);

        table.truncate().unwrap();
        assert_eq!(table.generation(), 5);

        // Reads never advance the generation...
        let _ = table.all().unwrap();
        let _ = table.search(&field("n").exists()).unwrap();
        assert_eq!(table.generation(), 5);
    }

    #[test]
    fn repeated_searches_hit_the_cache() {
        let table = table();
        seed_moons(&table);

        let query = field("radius_km").greater_than(1600);
        let first = table.search(&query).unwrap();
        // The second search uses a structurally equal but distinct predicate...
        let second = table.search(&field("radius_km").greater_than(1600)).unwrap();
        assert_eq!(first, second);

        let stats = table.cache_stats().unwrap();
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);

        table.clear_cache().unwrap();
        assert_eq!(table.cache_stats().unwrap().reads, 0);
        assert_eq!(table.cache_stats().unwrap().entries, 0);
    }

    #[test]
    fn returned_results_are_snapshots() {
        let table = table();
        seed_moons(&table);

        let before = table.search(&field("name").equals("Io")).unwrap();
        let _ = table
            .update(object! { "name" => "Renamed" }, None, Some(&[1]))
            .unwrap();

        // The vector obtained earlier is unaffected...
        assert_eq!(names(&before), vec!["Io"]);
        assert_eq!(names(&table.search(&field("name").equals("Renamed")).unwrap()), vec!["Renamed"]);
    }

    #[test]
    fn iterators_are_restartable_snapshots() {
        let table = table();
        seed_moons(&table);

        let mut iter = table.iter().unwrap();
        assert_eq!(iter.next().unwrap().id(), 1);

        // A fresh iterator starts over, even after a mutation...
        let _ = table.remove(None, Some(&[1])).unwrap();
        let restarted: Vec<DocId> = table.iter().unwrap().map(|doc| doc.id()).collect();
        assert_eq!(restarted, vec![2, 3]);

        // ...while the old one still walks its snapshot.
        assert_eq!(iter.next().unwrap().id(), 2);
        assert_eq!(iter.next().unwrap().id(), 3);
        assert!(iter.next().is_none());
    }

    #[test]
    fn next_ids_follow_the_max_rule() {
        let table = table();
        assert_eq!(table.insert_with_id(10, object! {}).unwrap(), 10);
        assert_eq!(table.insert(object! {}).unwrap(), 11);

        let (data, _) = table.read_data().unwrap();
        assert_eq!(next_id(&data), 12);
    }

    /// Runs the same mutation mix against differently cached tables and
    /// verifies that every strategy observes identical results throughout.
    #[test]
    fn cache_strategies_are_observationally_equivalent() {
        let invalidating = table_with(Options::new());
        let incremental = table_with(Options::new().cache_strategy(CacheStrategy::Incremental));
        let uncached = table_with(Options::new().cache_capacity(Some(0)));
        let tables = [&invalidating, &incremental, &uncached];

        let queries = [
            field("radius_km").greater_than(1600),
            field("active").equals(true),
            field("name").search("a").unwrap(),
        ];

        let check = |round: usize| {
            for query in &queries {
                let expected = uncached.search(query).unwrap();
                assert_eq!(
                    invalidating.search(query).unwrap(),
                    expected,
                    "invalidating table diverged in round {}",
                    round
                );
                assert_eq!(
                    incremental.search(query).unwrap(),
                    expected,
                    "incremental table diverged in round {}",
                    round
                );
            }
        };

        for table in tables {
            seed_moons(table);
        }
        check(1);

        for table in tables {
            let _ = table.insert(object! { "name" => "Callisto", "radius_km" => 2410.3, "active" => false }).unwrap();
        }
        check(2);

        for table in tables {
            let _ = table
                .update(object! { "radius_km" => 1200 }, Some(&field("name").equals("Io")), None)
                .unwrap();
        }
        check(3);

        for table in tables {
            let _ = table.remove(Some(&field("active").equals(false)), None).unwrap();
        }
        check(4);

        for table in tables {
            let _ = table
                .update(object! { "active" => false }, None, None)
                .unwrap();
        }
        check(5);
    }

    #[test]
    fn incremental_caches_are_patched_rather_than_cleared() {
        let table = table_with(Options::new().cache_strategy(CacheStrategy::Incremental));
        seed_moons(&table);

        let query = field("radius_km").greater_than(1600);
        assert_eq!(names(&table.search(&query).unwrap()), vec!["Io", "Ganymede"]);

        // An insert patches the cached entry, so the next search is a hit...
        let _ = table
            .insert(object! { "name" => "Callisto", "radius_km" => 2410.3 })
            .unwrap();
        assert_eq!(
            names(&table.search(&query).unwrap()),
            vec!["Io", "Ganymede", "Callisto"]
        );

        let stats = table.cache_stats().unwrap();
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
    }

    #[test]
    fn cloned_handles_share_state() {
        let table = table();
        let clone = table.clone();

        let _ = table.insert(object! { "n" => 1 }).unwrap();
        assert_eq!(clone.len().unwrap(), 1);
        assert_eq!(clone.generation(), 1);

        let _ = clone.search(&Predicate::always()).unwrap();
        assert_eq!(table.cache_stats().unwrap().writes, 1);
    }
}
