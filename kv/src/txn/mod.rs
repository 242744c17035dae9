//! Transactional layer: a TicToc (with a Silo-compatible variant) optimistic
//! concurrency control protocol wrapped around a [`crate::storage::engine::Engine`].
//!
//! Unlike [`crate::storage`]'s prior MVCC sketch, this layer keeps no historical
//! versions of a key. Instead each live key carries a single packed timestamp
//! record `(wts, delta)`; concurrent transactions buffer reads/writes privately
//! and validate against that record at commit time. See the module docs on
//! [`kvs`] for the full protocol.

mod config;
mod data_config;
mod entry;
mod kvs;
mod lock_table;
mod record;
mod thread_registry;
mod transaction;
mod tscache;


pub use config::{IsolationLevel, Protocol, TxnConfig};
pub use data_config::{DataConfig, LastWriteWins, SumCounterMerge};
pub use entry::{Message, MessageClass};
pub use kvs::{CommitOutcome, TransactionalKvs};
pub use transaction::{Transaction, RW_SET_SIZE_LIMIT};

/// A logical commit timestamp. Monotonically non-decreasing per key.
pub type Timestamp = u64;

/// Upper bound on concurrently registered OS threads. Chosen, as in the
/// worker subsystem this layer defers to, to fit a 64-bit thread-id bitmap.
pub const MAX_THREADS: usize = 64;
