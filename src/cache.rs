//! Component F: LRU caches with batch-scoped staging (`spec.md` §4.F, §9
//! "Staged caches"). Grounded in the teacher's flat-storage staging
//! pattern (`core/store/src/flat/store_helper.rs`): uncommitted deltas are
//! kept apart from the committed view and only merged in on commit.

use std::collections::HashMap;
use std::hash::Hash as StdHash;

use lru::LruCache;

/// One staged entry: either a fresh/updated value, or a tombstone marking
/// the key as removed for the duration of the batch.
enum Staged<V> {
    Value(V),
    Removed,
}

/// An LRU cache with an optional staging overlay active during a batch
/// (`spec.md` §4.G `start()`: "enters a 'staged' mode in the two LRU
/// caches"). Reads check the overlay first so in-batch readers see
/// uncommitted writes; `commit` merges the overlay into the base cache,
/// `drop` discards it.
pub struct StagedCache<K, V> {
    base: LruCache<K, V>,
    staged: Option<HashMap<K, Staged<V>>>,
}

impl<K: StdHash + Eq + Clone, V: Clone> StagedCache<K, V> {
    pub fn new(capacity: std::num::NonZeroUsize) -> Self {
        StagedCache { base: LruCache::new(capacity), staged: None }
    }

    pub fn start(&mut self) {
        self.staged = Some(HashMap::new());
    }

    pub fn drop_batch(&mut self) {
        self.staged = None;
    }

    /// Promotes staged mutations into the base cache (`spec.md` §4.G step
    /// 5: "Promote staged cache entries to committed").
    pub fn commit(&mut self) {
        if let Some(staged) = self.staged.take() {
            for (key, value) in staged {
                match value {
                    Staged::Value(v) => {
                        self.base.put(key, v);
                    }
                    Staged::Removed => {
                        self.base.pop(&key);
                    }
                }
            }
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        if let Some(staged) = &self.staged {
            match staged.get(key) {
                Some(Staged::Value(v)) => return Some(v.clone()),
                Some(Staged::Removed) => return None,
                None => {}
            }
        }
        self.base.get(key).cloned()
    }

    /// Inserts into the staged overlay if a batch is active, else directly
    /// into the base cache (used by read-path priming, which happens
    /// outside any batch).
    pub fn put(&mut self, key: K, value: V) {
        if let Some(staged) = &mut self.staged {
            staged.insert(key, Staged::Value(value));
        } else {
            self.base.put(key, value);
        }
    }

    pub fn remove(&mut self, key: &K) {
        if let Some(staged) = &mut self.staged {
            staged.insert(key.clone(), Staged::Removed);
        } else {
            self.base.pop(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_write_visible_in_batch_but_not_before_commit() {
        let mut cache: StagedCache<u32, &'static str> =
            StagedCache::new(std::num::NonZeroUsize::new(4).unwrap());
        cache.start();
        cache.put(1, "a");
        assert_eq!(cache.get(&1), Some("a"));
        cache.drop_batch();
        assert_eq!(cache.get(&1), None);
    }

    #[test]
    fn commit_promotes_staged_entries() {
        let mut cache: StagedCache<u32, &'static str> =
            StagedCache::new(std::num::NonZeroUsize::new(4).unwrap());
        cache.start();
        cache.put(1, "a");
        cache.commit();
        assert_eq!(cache.get(&1), Some("a"));
    }

    #[test]
    fn staged_removal_shadows_base_until_commit() {
        let mut cache: StagedCache<u32, &'static str> =
            StagedCache::new(std::num::NonZeroUsize::new(4).unwrap());
        cache.put(1, "a");
        cache.start();
        cache.remove(&1);
        assert_eq!(cache.get(&1), None);
        cache.drop_batch();
        assert_eq!(cache.get(&1), Some("a"));
    }
}
