/// Which commit protocol variant a [`crate::txn::TransactionalKvs`] runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Full TicToc: read validation extends `rts` via the delta-shift rule
    /// instead of aborting whenever it safely can.
    TicToc,
    /// Silo-compatible variant: the commit timestamp is always one past the
    /// highest observed `wts`, and read validation never extends `rts` --
    /// it only checks that the record hasn't moved.
    Silo,
}

/// Isolation level enforced by read validation. `Snapshot` additionally
/// requires the read set's timestamps to be mutually consistent at a single
/// point; `Serializable` is the default TicToc guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Serializable,
    Snapshot,
}

/// Runtime configuration for a [`crate::txn::TransactionalKvs`] instance.
#[derive(Debug, Clone)]
pub struct TxnConfig {
    pub protocol: Protocol,
    pub isolation: IsolationLevel,
    /// `log2` of the timestamp cache's initial slot count.
    pub tscache_log_slots: u32,
    /// Never evict timestamp cache entries, trading memory for the
    /// guarantee that a key's history is never lost to a refcount race.
    pub keep_all_keys: bool,
    /// Spin-retry backoff, in nanoseconds, between failed lock acquisitions
    /// while locking a write set.
    pub lock_retry_backoff_nanos: u64,
    /// When set, commit skips the underlying engine entirely and sleeps for
    /// a fixed 100ns instead -- a benchmark-isolation hook for measuring the
    /// commit protocol's own overhead, not a behavior change visible to
    /// callers under normal configuration.
    pub bypass_backend: bool,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::TicToc,
            isolation: IsolationLevel::Serializable,
            tscache_log_slots: 16,
            keep_all_keys: false,
            lock_retry_backoff_nanos: 1_000,
            bypass_backend: false,
        }
    }
}
