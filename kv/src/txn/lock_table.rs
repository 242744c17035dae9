use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Outcome of a non-blocking lock attempt.
///
/// `Deadlk` is kept as a variant for callers that want to handle it, but is
/// never produced here: committers always sort their write set by key
/// before acquiring locks, which rules out the cyclic wait a lock-ordering
/// violation would otherwise create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockResult {
    Ok,
    Busy,
    Deadlk,
}

/// Non-blocking per-key mutual exclusion used only by committers while they
/// hold locks across the validate-and-apply window. Readers never touch this
/// table; they validate against [`crate::txn::record::TimestampRecord`]
/// directly.
pub struct LockTable {
    locks: DashMap<Vec<u8>, Arc<AtomicBool>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Attempts to acquire the lock for `key`. Never blocks: returns
    /// `Busy` immediately if already held.
    pub fn try_acquire(&self, key: &[u8]) -> LockResult {
        let slot = match self.locks.entry(key.to_vec()) {
            Entry::Occupied(occ) => occ.get().clone(),
            Entry::Vacant(vac) => {
                let slot = Arc::new(AtomicBool::new(false));
                vac.insert(slot.clone());
                slot
            }
        };
        match slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => LockResult::Ok,
            Err(_) => LockResult::Busy,
        }
    }

    /// Releases the lock for `key`. Caller must currently hold it.
    pub fn release(&self, key: &[u8]) {
        if let Some(slot) = self.locks.get(key) {
            slot.store(false, Ordering::Release);
        }
    }

    /// Non-authoritative snapshot of whether `key` is currently locked, used
    /// by read validation to distinguish "lost the race to a committer" from
    /// "record mismatch".
    pub fn query_state(&self, key: &[u8]) -> bool {
        self.locks
            .get(key)
            .map(|s| s.load(Ordering::Acquire))
            .unwrap_or(false)
    }
}

impl Default for LockTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_then_busy_then_release_then_acquire() {
        let t = LockTable::new();
        assert_eq!(t.try_acquire(b"k"), LockResult::Ok);
        assert_eq!(t.try_acquire(b"k"), LockResult::Busy);
        assert!(t.query_state(b"k"));
        t.release(b"k");
        assert!(!t.query_state(b"k"));
        assert_eq!(t.try_acquire(b"k"), LockResult::Ok);
    }

    #[test]
    fn distinct_keys_dont_interfere() {
        let t = LockTable::new();
        assert_eq!(t.try_acquire(b"a"), LockResult::Ok);
        assert_eq!(t.try_acquire(b"b"), LockResult::Ok);
        t.release(b"a");
        assert!(!t.query_state(b"a"));
        assert!(t.query_state(b"b"));
    }

    #[test]
    fn unlocked_key_reports_unlocked() {
        let t = LockTable::new();
        assert!(!t.query_state(b"never-touched"));
    }
}
