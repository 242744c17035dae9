use std::sync::Arc;

use crate::error::{CResult, Error};
use crate::txn::entry::Message;
use crate::txn::record::TimestampSnapshot;
use crate::txn::tscache::CacheEntry;
use crate::txn::Timestamp;

/// Upper bound on the number of distinct keys a single transaction may
/// touch. Transactions are assumed short, so a bounded linear scan over a
/// small `Vec` is simpler and faster here than hashing.
pub const RW_SET_SIZE_LIMIT: usize = 64;

/// Per-key bookkeeping for one transaction. A key that is only read has
/// `write = None`; a key that is only written still records the timestamp
/// snapshot observed at the time of the first touch, needed to validate
/// read-modify-write access at commit.
pub(crate) struct RwEntry {
    pub key: Vec<u8>,
    pub tuple_ts: Arc<CacheEntry>,
    pub observed: TimestampSnapshot,
    pub read: bool,
    pub write: Option<Message>,
}

/// A single transaction's private read/write set, buffered until commit.
/// Holds no locks and touches no shared state beyond the [`CacheEntry`]
/// handles it accumulates, which is what lets reads and writes from
/// different transactions proceed without blocking each other until commit
/// time.
pub struct Transaction {
    pub(crate) tid: usize,
    pub(crate) entries: Vec<RwEntry>,
}

impl Transaction {
    pub(crate) fn new(tid: usize) -> Self {
        Self { tid, entries: Vec::new() }
    }

    pub fn tid(&self) -> usize {
        self.tid
    }

    fn find(&self, key: &[u8]) -> Option<usize> {
        self.entries.iter().position(|e| e.key == key)
    }

    /// Returns the index of `key`'s entry, creating one (via `tuple_ts`,
    /// `observed`) if this is the first touch this transaction. Errors once
    /// [`RW_SET_SIZE_LIMIT`] distinct keys have been touched.
    pub(crate) fn get_or_create_entry(
        &mut self,
        key: &[u8],
        make_new: impl FnOnce() -> (Arc<CacheEntry>, TimestampSnapshot),
    ) -> CResult<usize> {
        if let Some(idx) = self.find(key) {
            return Ok(idx);
        }
        if self.entries.len() >= RW_SET_SIZE_LIMIT {
            return Err(Error::Internal(format!(
                "transaction exceeded read/write set limit of {}",
                RW_SET_SIZE_LIMIT
            )));
        }
        let (tuple_ts, observed) = make_new();
        self.entries.push(RwEntry {
            key: key.to_vec(),
            tuple_ts,
            observed,
            read: false,
            write: None,
        });
        Ok(self.entries.len() - 1)
    }

    /// The buffered write for `key`, if this transaction has issued one,
    /// applying the read-own-writes merge the caller supplies.
    pub(crate) fn buffered_write(&self, key: &[u8]) -> Option<&Message> {
        self.find(key).and_then(|idx| self.entries[idx].write.as_ref())
    }

    pub(crate) fn read_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.entries.len()).filter(move |&i| self.entries[i].read)
    }

    pub(crate) fn write_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.entries.len()).filter(move |&i| self.entries[i].write.is_some())
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn touched_keys(&self) -> usize {
        self.entries.len()
    }
}
