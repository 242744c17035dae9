use std::sync::atomic::{AtomicU64, Ordering};

use crate::txn::Timestamp;

/// Width of the packed `delta` field. A 64-bit-wide delta would make the
/// shift in `extend_rts_to` a permanent no-op, so 15 bits is chosen instead
/// to keep that code path meaningfully exercised, leaving 49 bits for `wts`.
const DELTA_BITS: u32 = 15;
const DELTA_MASK: u64 = (1 << DELTA_BITS) - 1;

/// A snapshot of a [`TimestampRecord`]'s `(wts, delta)` pair, taken atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampSnapshot {
    pub wts: Timestamp,
    pub delta: Timestamp,
}

impl TimestampSnapshot {
    /// `rts` is always derived, never stored directly.
    pub fn rts(&self) -> Timestamp {
        self.wts + self.delta
    }
}

fn pack(wts: Timestamp, delta: Timestamp) -> u64 {
    debug_assert!(delta <= DELTA_MASK, "delta {} exceeds packed width", delta);
    debug_assert!(
        wts <= (u64::MAX >> DELTA_BITS),
        "wts {} exceeds packed width",
        wts
    );
    (wts << DELTA_BITS) | delta
}

fn unpack(word: u64) -> TimestampSnapshot {
    TimestampSnapshot {
        wts: word >> DELTA_BITS,
        delta: word & DELTA_MASK,
    }
}

/// A key's write/read timestamp pair, packed into one machine word so that
/// `load` is atomic without a seqlock. `rts := wts + delta` always.
pub struct TimestampRecord {
    packed: AtomicU64,
}

impl TimestampRecord {
    pub fn new() -> Self {
        Self {
            packed: AtomicU64::new(pack(0, 0)),
        }
    }

    pub fn load(&self) -> TimestampSnapshot {
        unpack(self.packed.load(Ordering::Acquire))
    }

    pub fn wts(&self) -> Timestamp {
        self.load().wts
    }

    pub fn rts(&self) -> Timestamp {
        self.load().rts()
    }

    /// Overwrites `(wts, delta)` unconditionally. Callers must hold the row
    /// lock for this key.
    pub fn store_under_lock(&self, wts: Timestamp, delta: Timestamp) {
        self.packed.store(pack(wts, delta), Ordering::Release);
    }

    /// Extends `rts` up to at least `commit_ts` without lowering `wts`,
    /// shifting `wts` forward when `delta` would otherwise overflow its
    /// packed width. Caller must hold the row lock.
    pub fn extend_rts_to(&self, commit_ts: Timestamp) {
        let snap = self.load();
        debug_assert!(commit_ts > snap.wts, "commit_ts must exceed wts to extend");
        let delta_new = commit_ts - snap.wts;
        if delta_new <= DELTA_MASK {
            self.store_under_lock(snap.wts, delta_new);
        } else {
            let shift = delta_new - (delta_new & DELTA_MASK);
            self.store_under_lock(snap.wts + shift, delta_new - shift);
        }
    }
}

impl Default for TimestampRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_record_is_zero() {
        let r = TimestampRecord::new();
        let s = r.load();
        assert_eq!(s.wts, 0);
        assert_eq!(s.delta, 0);
        assert_eq!(s.rts(), 0);
    }

    #[test]
    fn rts_always_geq_wts() {
        let r = TimestampRecord::new();
        r.store_under_lock(100, 0);
        assert!(r.rts() >= r.wts());
        r.extend_rts_to(140);
        assert!(r.rts() >= r.wts());
        assert_eq!(r.rts(), 140);
    }

    #[test]
    fn extend_within_delta_width_keeps_wts() {
        let r = TimestampRecord::new();
        r.store_under_lock(100, 0);
        r.extend_rts_to(100 + DELTA_MASK);
        let s = r.load();
        assert_eq!(s.wts, 100);
        assert_eq!(s.rts(), 100 + DELTA_MASK);
    }

    #[test]
    fn extend_beyond_delta_width_shifts_wts_but_preserves_rts() {
        let r = TimestampRecord::new();
        r.store_under_lock(100, 0);
        let target = 100 + DELTA_MASK + 500;
        r.extend_rts_to(target);
        let s = r.load();
        assert!(s.delta <= DELTA_MASK);
        assert_eq!(s.rts(), target);
        assert!(s.wts > 100);
    }

    #[test]
    fn wts_monotonic_under_repeated_commits() {
        let r = TimestampRecord::new();
        let mut last_wts = 0;
        for ts in [5u64, 20, 20, 55, 1000] {
            r.store_under_lock(ts.max(last_wts), 0);
            let wts = r.wts();
            assert!(wts >= last_wts);
            last_wts = wts;
        }
    }
}
