//! Implements the per-table query result cache.
//!
//! The cache is an LRU keyed by [QueryKey]: repeating a structurally equal
//! query is answered from memory instead of re-scanning the table. Reading an
//! entry refreshes it, inserts evict the least recently used entries while the
//! cache is over capacity. A capacity of `Some(0)` disables the cache
//! entirely, `None` removes the bound.
//!
//! Every entry remembers the table generation it was computed at. How entries
//! survive mutations depends on the [CacheStrategy]: `Invalidate` simply
//! clears the cache, `Incremental` patches live entries using the change
//! description of the mutation. Both strategies answer every query with
//! exactly the same results - the incremental mode only saves re-scans, it
//! must never change what a query returns.
use linked_hash_map::LinkedHashMap;

use crate::config::CacheStrategy;
use crate::db::table::Change;
use crate::docs::Document;
use crate::query::{Predicate, QueryKey};

/// A cached result list along with the predicate which produced it and the
/// generation it is valid for.
struct CacheEntry {
    predicate: Predicate,
    results: Vec<Document>,
    generation: u64,
}

/// Usage statistics of a query cache, as reported by a table.
#[derive(Clone, Copy, Debug)]
pub struct CacheStats {
    /// The number of lookups performed.
    pub reads: usize,

    /// The number of lookups answered from the cache.
    pub hits: usize,

    /// The number of result lists stored.
    pub writes: usize,

    /// The number of entries currently cached.
    pub entries: usize,
}

impl CacheStats {
    /// Computes the cache hit rate (in percent).
    pub fn hit_rate(&self) -> i32 {
        if self.reads > 0 {
            (self.hits * 100 / self.reads) as i32
        } else {
            0
        }
    }
}

/// The LRU cache holding query results for a single table.
pub(crate) struct QueryCache {
    map: LinkedHashMap<QueryKey, CacheEntry>,
    capacity: Option<usize>,
    strategy: CacheStrategy,
    reads: usize,
    hits: usize,
    writes: usize,
}

impl QueryCache {
    /// Creates a cache with the given capacity and strategy.
    pub(crate) fn new(capacity: Option<usize>, strategy: CacheStrategy) -> Self {
        QueryCache {
            map: LinkedHashMap::new(),
            capacity,
            strategy,
            reads: 0,
            hits: 0,
            writes: 0,
        }
    }

    fn enabled(&self) -> bool {
        self.capacity != Some(0)
    }

    /// Looks up the results for the given key, if they are present and were
    /// computed at the given generation. A hit refreshes the entry in the
    /// LRU order, a stale entry is dropped.
    pub(crate) fn get(&mut self, key: &QueryKey, generation: u64) -> Option<Vec<Document>> {
        self.reads += 1;

        let stale = match self.map.get_refresh(key) {
            Some(entry) if entry.generation == generation => {
                self.hits += 1;
                return Some(entry.results.clone());
            }
            Some(_) => true,
            None => false,
        };
        if stale {
            let _ = self.map.remove(key);
        }

        None
    }

    /// Stores the results computed for the given predicate at the given
    /// generation, evicting the least recently used entries if needed.
    pub(crate) fn put(&mut self, predicate: &Predicate, results: Vec<Document>, generation: u64) {
        if !self.enabled() {
            return;
        }

        self.writes += 1;
        let _ = self.map.insert(
            predicate.key().clone(),
            CacheEntry {
                predicate: predicate.clone(),
                results,
                generation,
            },
        );
        self.enforce_capacity();
    }

    fn enforce_capacity(&mut self) {
        if let Some(capacity) = self.capacity {
            while self.map.len() > capacity {
                let _ = self.map.pop_front();
            }
        }
    }

    /// Reacts to a table mutation which moved the table to the given
    /// generation.
    pub(crate) fn apply(&mut self, change: &Change, generation: u64) {
        if !self.enabled() {
            return;
        }

        match self.strategy {
            CacheStrategy::Invalidate => self.map.clear(),
            CacheStrategy::Incremental => {
                self.drop_outdated(generation);
                self.patch(change, generation);
            }
        }
    }

    /// Drops all entries which are not at the generation directly preceding
    /// the given one. Such entries missed an earlier change and can no longer
    /// be repaired by patching.
    fn drop_outdated(&mut self, generation: u64) {
        let outdated: Vec<QueryKey> = self
            .map
            .iter()
            .filter(|(_, entry)| entry.generation + 1 != generation)
            .map(|(key, _)| key.clone())
            .collect();
        for key in outdated {
            let _ = self.map.remove(&key);
        }
    }

    /// Patches live entries so that they reflect the given change.
    fn patch(&mut self, change: &Change, generation: u64) {
        match change {
            Change::Inserted(docs) => {
                for (_, entry) in self.map.iter_mut() {
                    for doc in docs {
                        // Inserts append at the end of the table, so appending
                        // to the results keeps them in table order...
                        if entry.predicate.matches(doc.fields()) {
                            entry.results.push(doc.clone());
                        }
                    }
                    entry.generation = generation;
                }
            }
            Change::Removed(ids) => {
                for (_, entry) in self.map.iter_mut() {
                    entry.results.retain(|doc| !ids.contains(&doc.id()));
                    entry.generation = generation;
                }
            }
            Change::Updated(docs) => {
                let mut evict: Vec<QueryKey> = Vec::new();
                for (key, entry) in self.map.iter_mut() {
                    // A document which starts to match an entry it wasn't part
                    // of would have to be spliced in at its table position,
                    // which only a re-scan can determine. Such entries are
                    // evicted and recomputed on their next lookup...
                    let newly_matching = docs.iter().any(|doc| {
                        entry.predicate.matches(doc.fields())
                            && !entry.results.iter().any(|result| result.id() == doc.id())
                    });
                    if newly_matching {
                        evict.push(key.clone());
                        continue;
                    }

                    for doc in docs {
                        if entry.predicate.matches(doc.fields()) {
                            if let Some(result) = entry
                                .results
                                .iter_mut()
                                .find(|result| result.id() == doc.id())
                            {
                                *result = doc.clone();
                            }
                        } else {
                            entry.results.retain(|result| result.id() != doc.id());
                        }
                    }
                    entry.generation = generation;
                }

                for key in evict {
                    let _ = self.map.remove(&key);
                }
            }
            Change::Cleared => self.map.clear(),
        }
    }

    /// Clears all entries and resets the statistics.
    pub(crate) fn flush(&mut self) {
        self.map.clear();
        self.reads = 0;
        self.hits = 0;
        self.writes = 0;
    }

    /// Reports the current usage statistics.
    pub(crate) fn stats(&self) -> CacheStats {
        CacheStats {
            reads: self.reads,
            hits: self.hits,
            writes: self.writes,
            entries: self.map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CacheStrategy;
    use crate::db::cache::QueryCache;
    use crate::db::table::Change;
    use crate::docs::Document;
    use crate::query::{field, Predicate};
    use crate::object;

    fn doc(id: u64, size: i64) -> Document {
        Document::new(id, object! { "size" => size })
    }

    #[test]
    fn hits_require_key_and_generation() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Invalidate);
        let query = field("size").greater_than(1);

        cache.put(&query, vec![doc(1, 2)], 0);
        assert_eq!(cache.get(query.key(), 0), Some(vec![doc(1, 2)]));
        // Another generation means the entry is stale and gets dropped...
        assert_eq!(cache.get(query.key(), 1), None);
        assert_eq!(cache.get(query.key(), 0), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn lru_evicts_the_least_recently_used_entry() {
        let mut cache = QueryCache::new(Some(2), CacheStrategy::Invalidate);
        let first = field("size").equals(1);
        let second = field("size").equals(2);
        let third = field("size").equals(3);

        cache.put(&first, vec![], 0);
        cache.put(&second, vec![], 0);
        // Touching the first entry makes the second one the eviction victim...
        assert_eq!(cache.get(first.key(), 0), Some(vec![]));
        cache.put(&third, vec![], 0);

        assert!(cache.get(first.key(), 0).is_some());
        assert!(cache.get(second.key(), 0).is_none());
        assert!(cache.get(third.key(), 0).is_some());
    }

    #[test]
    fn capacity_zero_disables_the_cache() {
        let mut cache = QueryCache::new(Some(0), CacheStrategy::Invalidate);
        let query = field("size").equals(1);

        cache.put(&query, vec![doc(1, 1)], 0);
        assert_eq!(cache.get(query.key(), 0), None);
        assert_eq!(cache.stats().writes, 0);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn unlimited_capacity_never_evicts() {
        let mut cache = QueryCache::new(None, CacheStrategy::Invalidate);
        for size in 0..100 {
            cache.put(&field("size").equals(size), vec![], 0);
        }
        assert_eq!(cache.stats().entries, 100);
    }

    #[test]
    fn invalidate_strategy_clears_on_mutations() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Invalidate);
        let query = field("size").greater_than(0);
        cache.put(&query, vec![doc(1, 1)], 0);

        cache.apply(&Change::Inserted(vec![doc(2, 5)]), 1);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.get(query.key(), 1), None);
    }

    #[test]
    fn incremental_strategy_appends_matching_inserts() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Incremental);
        let query = field("size").greater_than(10);
        cache.put(&query, vec![doc(1, 20)], 0);

        cache.apply(&Change::Inserted(vec![doc(2, 5), doc(3, 30)]), 1);
        assert_eq!(cache.get(query.key(), 1), Some(vec![doc(1, 20), doc(3, 30)]));
    }

    #[test]
    fn incremental_strategy_prunes_removed_ids() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Incremental);
        let query = field("size").greater_than(0);
        cache.put(&query, vec![doc(1, 1), doc(2, 2), doc(3, 3)], 0);

        let mut removed = fnv::FnvHashSet::default();
        let _ = removed.insert(2);
        cache.apply(&Change::Removed(removed), 1);

        assert_eq!(cache.get(query.key(), 1), Some(vec![doc(1, 1), doc(3, 3)]));
    }

    #[test]
    fn incremental_strategy_updates_in_place() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Incremental);
        let query = field("size").greater_than(10);
        cache.put(&query, vec![doc(1, 20), doc(2, 30)], 0);

        // Still matching: replaced in place, keeping its position...
        cache.apply(&Change::Updated(vec![doc(1, 25)]), 1);
        assert_eq!(cache.get(query.key(), 1), Some(vec![doc(1, 25), doc(2, 30)]));

        // No longer matching: removed from the results...
        cache.apply(&Change::Updated(vec![doc(2, 5)]), 2);
        assert_eq!(cache.get(query.key(), 2), Some(vec![doc(1, 25)]));
    }

    #[test]
    fn incremental_strategy_evicts_on_newly_matching_documents() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Incremental);
        let query = field("size").greater_than(10);
        cache.put(&query, vec![doc(2, 20)], 0);

        // Document 1 was not part of the results but matches now - its
        // position cannot be known, so the entry has to go...
        cache.apply(&Change::Updated(vec![doc(1, 15)]), 1);
        assert_eq!(cache.get(query.key(), 1), None);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn truncation_clears_either_strategy() {
        for strategy in [CacheStrategy::Invalidate, CacheStrategy::Incremental] {
            let mut cache = QueryCache::new(Some(10), strategy);
            cache.put(&Predicate::always(), vec![doc(1, 1)], 0);
            cache.apply(&Change::Cleared, 1);
            assert_eq!(cache.stats().entries, 0);
        }
    }

    #[test]
    fn stats_track_usage_and_flush_resets() {
        let mut cache = QueryCache::new(Some(10), CacheStrategy::Invalidate);
        let query = field("size").equals(1);

        assert_eq!(cache.get(query.key(), 0), None);
        cache.put(&query, vec![], 0);
        assert_eq!(cache.get(query.key(), 0), Some(vec![]));

        let stats = cache.stats();
        assert_eq!(stats.reads, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.hit_rate(), 50);

        cache.flush();
        let stats = cache.stats();
        assert_eq!(stats.reads, 0);
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.writes, 0);
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.hit_rate(), 0);
    }
}
