#![allow(non_camel_case_types)]

//! `kv` is a transactional key-value store: an append-only log engine
//! (or an in-memory one, for tests and benchmarks) wrapped in a TicToc
//! optimistic concurrency control layer.
//!
//! ## Getting started
//!
//! ```rust
//! use kv::error::Error;
//! use kv::storage::memory::Memory;
//! use kv::txn::{CommitOutcome, LastWriteWins, TransactionalKvs, TxnConfig};
//!
//! fn main() -> Result<(), Error> {
//!     let kvs = TransactionalKvs::new(Memory::new(), LastWriteWins, TxnConfig::default());
//!
//!     let mut txn = kvs.begin(0);
//!     kvs.insert(&mut txn, b"a", vec![0x01])?;
//!     kvs.insert(&mut txn, b"b", vec![0x02])?;
//!     assert_eq!(kvs.commit(&mut txn)?, CommitOutcome::Committed);
//!
//!     let mut txn = kvs.begin(0);
//!     assert_eq!(kvs.lookup(&mut txn, b"a")?, Some(vec![0x01]));
//!     kvs.commit(&mut txn)?;
//!
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod storage;
pub mod txn;

#[cfg(test)]
mod test {
    use crate::error::Error;
    use crate::storage::engine::Engine;
    use crate::storage::log_cask::LogCask;

    #[test]
    fn run() -> Result<(), Error> {
        let path = tempdir::TempDir::new("demo")?.path().join("whosdb");

        let mut engine = LogCask::new(path)?;
        engine.set(b"b", vec![0x01])?;
        engine.set(b"b", vec![0x02])?;

        engine.set(b"e", vec![0x05])?;
        engine.delete(b"e")?;

        engine.set(b"c", vec![0x00])?;
        engine.delete(b"c")?;
        engine.set(b"c", vec![0x03])?;

        engine.set(b"", vec![])?;

        engine.set(b"a", vec![0x01])?;

        engine.delete(b"f")?;

        engine.delete(b"d")?;
        engine.set(b"d", vec![0x04])?;

        // Make sure the scan yields the expected results.
        assert_eq!(
            vec![
                (b"".to_vec(), vec![]),
                (b"a".to_vec(), vec![0x01]),
                (b"b".to_vec(), vec![0x02]),
                (b"c".to_vec(), vec![0x03]),
                (b"d".to_vec(), vec![0x04]),
            ],
            engine.scan(..).collect::<Result<Vec<_>, Error>>()?,
        );

        engine.flush()?;

        Ok(())
    }
}
