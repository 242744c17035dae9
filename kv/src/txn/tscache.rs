use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::txn::record::TimestampRecord;

/// A timestamp record together with the reference count that governs its
/// lifetime in the cache.
pub struct CacheEntry {
    pub record: TimestampRecord,
    refcount: AtomicI64,
}

impl CacheEntry {
    fn fresh() -> Arc<Self> {
        Arc::new(Self {
            record: TimestampRecord::new(),
            refcount: AtomicI64::new(1),
        })
    }

    /// A detached entry not tracked by any cache, used when a transaction
    /// needs a placeholder handle before the key is actually cached.
    #[cfg(test)]
    pub(crate) fn test_new() -> Self {
        Self {
            record: TimestampRecord::new(),
            refcount: AtomicI64::new(0),
        }
    }
}

/// Concurrent, reference-counted `key -> timestamp record` map.
///
/// Pointer stability between a matched `insert_or_get`/`get_and_remove` pair
/// is provided by `Arc`: callers hold a clone of the `Arc<CacheEntry>`, which
/// keeps the record alive independent of the table's own bookkeeping.
///
/// Whether a key's record should ever be evicted once its refcount reaches
/// zero is a `keep-all-keys` policy carried as a runtime property of the
/// cache itself, so a single `insert_or_get` entry point suffices for both
/// behaviors instead of two separate methods.
pub struct TimestampCache {
    slots: DashMap<Vec<u8>, Arc<CacheEntry>>,
    keep_all_keys: bool,
}

impl TimestampCache {
    /// `log_slots` is the log2 of the initial slot count to preallocate.
    /// `DashMap` grows on demand regardless, so this only sizes the initial
    /// allocation and is clamped to keep that allocation sane even when a
    /// caller passes a very large value.
    pub fn with_capacity(log_slots: u32, keep_all_keys: bool) -> Self {
        let capacity = 1usize << log_slots.min(16);
        Self {
            slots: DashMap::with_capacity(capacity),
            keep_all_keys,
        }
    }

    /// Returns `(record, was_new)`. If absent, installs `wts=0, delta=0,
    /// refcount=1`. If present, bumps the refcount (unless `keep-all-keys`)
    /// and returns the existing record.
    pub fn insert_or_get(&self, key: &[u8], _tid: usize) -> (Arc<CacheEntry>, bool) {
        match self.slots.entry(key.to_vec()) {
            Entry::Occupied(occ) => {
                let entry = occ.get().clone();
                if !self.keep_all_keys {
                    entry.refcount.fetch_add(1, Ordering::AcqRel);
                }
                (entry, false)
            }
            Entry::Vacant(vac) => {
                let entry = CacheEntry::fresh();
                vac.insert(entry.clone());
                (entry, true)
            }
        }
    }

    /// Decrements the refcount, removing the record once it reaches zero.
    /// Returns whether the key was present. Under `keep-all-keys` this never
    /// mutates the refcount and the record is never evicted.
    pub fn get_and_remove(&self, key: &[u8], _tid: usize) -> bool {
        if self.keep_all_keys {
            return self.slots.contains_key(key);
        }
        let Some(entry) = self.slots.get(key).map(|r| r.value().clone()) else {
            return false;
        };
        let prev = entry.refcount.fetch_sub(1, Ordering::AcqRel);
        if prev == 1 {
            // Re-check under the shard lock: another thread may have
            // resurrected this key via insert_or_get in the meantime.
            self.slots
                .remove_if(key, |_, e| e.refcount.load(Ordering::Acquire) <= 0);
        }
        true
    }

    /// Diagnostic dump of non-empty slots.
    pub fn print_state(&self) {
        for item in self.slots.iter() {
            let snap = item.value().record.load();
            log::debug!(
                "tscache key={:?} wts={} delta={} refcount={}",
                item.key(),
                snap.wts,
                snap.delta,
                item.value().refcount.load(Ordering::Relaxed)
            );
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    pub(crate) fn refcount_of(&self, key: &[u8]) -> Option<i64> {
        self.slots.get(key).map(|e| e.refcount.load(Ordering::Acquire))
    }
}
