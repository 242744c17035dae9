use std::cmp::Ordering as CmpOrdering;

/// User-supplied comparison and merge behavior for a keyspace.
///
/// Installed once per store and invoked through polymorphic dispatch, so a
/// caller can pick or swap an implementation at construction time while the
/// commit protocol keeps the same three call sites.
pub trait DataConfig: Send + Sync {
    /// Orders two keys. Determines the sort a committer applies to its write
    /// set before acquiring locks, which is what rules out deadlock between
    /// committers.
    fn key_compare(&self, a: &[u8], b: &[u8]) -> CmpOrdering {
        a.cmp(b)
    }

    /// Merges an `Update` message's payload against the prior value (either
    /// another buffered message in the same transaction, or the committed
    /// value on first touch). `prior` is `None` if the key does not yet
    /// exist in the committed store.
    fn merge_tuples(&self, prior: Option<&[u8]>, update: &[u8]) -> Vec<u8>;

    /// Final merge applied when a transaction reads back a key it has
    /// already buffered a write for: combines the buffered message against a
    /// fresh lookup of the committed value, so a chain of buffered updates
    /// in the same transaction collapses to the right answer without
    /// waiting for commit.
    fn merge_tuples_final(&self, committed: Option<&[u8]>, buffered: &[u8]) -> Vec<u8> {
        self.merge_tuples(committed, buffered)
    }
}

/// The simplest `DataConfig`: every `Update` replaces the prior value
/// outright, same as `Insert`. Suitable when values are opaque blobs with no
/// application-level merge semantics.
pub struct LastWriteWins;

impl DataConfig for LastWriteWins {
    fn merge_tuples(&self, _prior: Option<&[u8]>, update: &[u8]) -> Vec<u8> {
        update.to_vec()
    }
}

/// A `DataConfig` for values that are little-endian `i64` counters: `Update`
/// adds its payload to the prior value instead of replacing it. Demonstrates
/// the merge hook's intended use (e.g. a counter keyspace) rather than being
/// load-bearing for the commit protocol itself.
pub struct SumCounterMerge;

impl SumCounterMerge {
    fn decode(bytes: &[u8]) -> i64 {
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        i64::from_le_bytes(buf)
    }
}

impl DataConfig for SumCounterMerge {
    fn merge_tuples(&self, prior: Option<&[u8]>, update: &[u8]) -> Vec<u8> {
        let base = prior.map(Self::decode).unwrap_or(0);
        let delta = Self::decode(update);
        (base + delta).to_le_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_write_wins_ignores_prior() {
        let cfg = LastWriteWins;
        assert_eq!(cfg.merge_tuples(Some(b"old"), b"new"), b"new");
        assert_eq!(cfg.merge_tuples(None, b"new"), b"new");
    }

    #[test]
    fn sum_counter_merge_adds_to_prior() {
        let cfg = SumCounterMerge;
        let prior = 10i64.to_le_bytes().to_vec();
        let update = 5i64.to_le_bytes().to_vec();
        let merged = cfg.merge_tuples(Some(&prior), &update);
        assert_eq!(i64::from_le_bytes(merged.try_into().unwrap()), 15);
    }

    #[test]
    fn sum_counter_merge_treats_absent_prior_as_zero() {
        let cfg = SumCounterMerge;
        let update = 7i64.to_le_bytes().to_vec();
        let merged = cfg.merge_tuples(None, &update);
        assert_eq!(i64::from_le_bytes(merged.try_into().unwrap()), 7);
    }

    #[test]
    fn default_key_compare_is_byte_lexicographic() {
        let cfg = LastWriteWins;
        assert_eq!(cfg.key_compare(b"a", b"b"), CmpOrdering::Less);
    }
}
