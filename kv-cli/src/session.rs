use std::io::BufRead;
use std::path::PathBuf;

use kv::error::CResult;
use kv::storage::log_cask::LogCask;
use kv::storage::memory::Memory;
use kv::txn::{CommitOutcome, LastWriteWins, Transaction, TransactionalKvs, TxnConfig};

use crate::config::ConfigLoad;

/// Either backing engine a session can be opened against, chosen by
/// `ConfigLoad::db_path`. [`Transaction`] carries no engine type parameter,
/// so a single in-flight transaction moves between calls into either arm
/// without the caller needing to know which backend it is running against.
enum Backend {
    Disk(TransactionalKvs<LogCask, LastWriteWins>),
    Memory(TransactionalKvs<Memory, LastWriteWins>),
}

/// An interactive or scripted session against a single [`TransactionalKvs`].
/// Tracks at most one in-flight transaction, opened by an explicit `BEGIN`
/// and closed by `COMMIT` or `ABORT`; commands issued outside of that window
/// run as their own single-statement, auto-committed transaction.
pub struct Session {
    backend: Backend,
    tid: usize,
    txn: Option<Transaction>,
    pub show_stats: bool,
    ops_run: u64,
}

impl Session {
    pub fn try_new(cfg: &ConfigLoad) -> CResult<Self> {
        let backend = if cfg.db_path == ":memory:" {
            let kvs = TransactionalKvs::new(Memory::new(), LastWriteWins, TxnConfig::default());
            Backend::Memory(kvs)
        } else {
            let engine = LogCask::new(PathBuf::from(&cfg.db_path))?;
            let kvs = TransactionalKvs::new(engine, LastWriteWins, TxnConfig::default());
            Backend::Disk(kvs)
        };
        let tid = match &backend {
            Backend::Disk(kvs) => kvs.register_thread()?,
            Backend::Memory(kvs) => kvs.register_thread()?,
        };
        Ok(Self {
            backend,
            tid,
            txn: None,
            show_stats: cfg.show_stats.unwrap_or(false),
            ops_run: 0,
        })
    }

    /// Runs a single REPL line, returning the text to print to the user.
    pub fn handle_line(&mut self, line: &str) -> CResult<String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(String::new());
        }
        let mut parts = line.splitn(3, char::is_whitespace);
        let verb = parts.next().unwrap_or("").to_ascii_uppercase();
        let rest: Vec<&str> = parts.collect();

        let output = match verb.as_str() {
            "BEGIN" => {
                if self.txn.is_some() {
                    "ERR transaction already open".to_string()
                } else {
                    self.txn = Some(self.begin());
                    "OK".to_string()
                }
            }
            "COMMIT" => match self.txn.take() {
                None => "ERR no transaction open".to_string(),
                Some(mut txn) => match self.commit(&mut txn)? {
                    CommitOutcome::Committed => "OK".to_string(),
                    CommitOutcome::Aborted => "ABORTED".to_string(),
                },
            },
            "ABORT" | "ROLLBACK" => match self.txn.take() {
                None => "ERR no transaction open".to_string(),
                Some(mut txn) => {
                    self.abort(&mut txn);
                    "OK".to_string()
                }
            },
            "GET" => {
                let Some(key) = rest.first() else {
                    return Ok("ERR usage: GET key".to_string());
                };
                self.run_autocommit(|session, txn| session.lookup(txn, key.as_bytes())).map(
                    |value| match value {
                        Some(v) => String::from_utf8_lossy(&v).into_owned(),
                        None => "(nil)".to_string(),
                    },
                )?
            }
            "SET" => {
                let (Some(key), Some(value)) = (rest.first(), rest.get(1)) else {
                    return Ok("ERR usage: SET key value".to_string());
                };
                self.run_autocommit_write(|session, txn| {
                    session.insert(txn, key.as_bytes(), value.as_bytes().to_vec())
                })?;
                "OK".to_string()
            }
            "DEL" | "DELETE" => {
                let Some(key) = rest.first() else {
                    return Ok("ERR usage: DEL key".to_string());
                };
                self.run_autocommit_write(|session, txn| session.delete(txn, key.as_bytes()))?;
                "OK".to_string()
            }
            _ => format!("ERR unknown command {verb:?}"),
        };
        self.ops_run += 1;
        Ok(if self.show_stats {
            format!("{output}  ({} ops)", self.ops_run)
        } else {
            output
        })
    }

    /// Processes every line from `reader` in sequence, printing results to
    /// stdout. Used for piped input and `--query`.
    pub fn handle_reader(&mut self, reader: impl BufRead) -> CResult<()> {
        for line in reader.lines() {
            let line = line.map_err(kv::error::Error::from)?;
            let out = self.handle_line(&line)?;
            if !out.is_empty() {
                println!("{out}");
            }
        }
        Ok(())
    }

    pub fn teardown(self) -> CResult<()> {
        match &self.backend {
            Backend::Disk(kvs) => kvs.teardown()?,
            Backend::Memory(kvs) => kvs.teardown()?,
        }
        match self.backend {
            Backend::Disk(kvs) => kvs.deregister_thread(self.tid),
            Backend::Memory(kvs) => kvs.deregister_thread(self.tid),
        }
        Ok(())
    }

    fn begin(&self) -> Transaction {
        match &self.backend {
            Backend::Disk(kvs) => kvs.begin(self.tid),
            Backend::Memory(kvs) => kvs.begin(self.tid),
        }
    }

    fn lookup(&self, txn: &mut Transaction, key: &[u8]) -> CResult<Option<Vec<u8>>> {
        match &self.backend {
            Backend::Disk(kvs) => kvs.lookup(txn, key),
            Backend::Memory(kvs) => kvs.lookup(txn, key),
        }
    }

    fn insert(&self, txn: &mut Transaction, key: &[u8], value: Vec<u8>) -> CResult<()> {
        match &self.backend {
            Backend::Disk(kvs) => kvs.insert(txn, key, value),
            Backend::Memory(kvs) => kvs.insert(txn, key, value),
        }
    }

    fn delete(&self, txn: &mut Transaction, key: &[u8]) -> CResult<()> {
        match &self.backend {
            Backend::Disk(kvs) => kvs.delete(txn, key),
            Backend::Memory(kvs) => kvs.delete(txn, key),
        }
    }

    fn commit(&self, txn: &mut Transaction) -> CResult<CommitOutcome> {
        match &self.backend {
            Backend::Disk(kvs) => kvs.commit(txn),
            Backend::Memory(kvs) => kvs.commit(txn),
        }
    }

    fn abort(&self, txn: &mut Transaction) {
        match &self.backend {
            Backend::Disk(kvs) => kvs.abort(txn),
            Backend::Memory(kvs) => kvs.abort(txn),
        }
    }

    fn run_autocommit<T>(
        &mut self,
        op: impl FnOnce(&Self, &mut Transaction) -> CResult<T>,
    ) -> CResult<T> {
        if let Some(mut txn) = self.txn.take() {
            let result = op(self, &mut txn);
            self.txn = Some(txn);
            return result;
        }
        let mut txn = self.begin();
        let result = op(self, &mut txn)?;
        self.commit(&mut txn)?;
        Ok(result)
    }

    fn run_autocommit_write(
        &mut self,
        op: impl FnOnce(&Self, &mut Transaction) -> CResult<()>,
    ) -> CResult<()> {
        self.run_autocommit(op)
    }
}
