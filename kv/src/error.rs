//! Error types shared by the storage engine and the transactional layer.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type CResult<T> = Result<T, Error>;

/// Errors surfaced by `kv`.
///
/// Conflict aborts are deliberately **not** represented here: per the TicToc
/// commit protocol an abort is an expected outcome that the caller retries,
/// not an error condition. See [`crate::txn::CommitOutcome`].
#[derive(Debug)]
pub enum Error {
    /// An I/O failure from the underlying filesystem.
    IO(std::io::Error),

    /// A malformed or out-of-range value was supplied to an engine operation.
    Value(String),

    /// Anything else: corrupted on-disk state, invariant violations that
    /// couldn't be upgraded to a hard assert, etc.
    Internal(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "I/O error: {}", err),
            Error::Value(msg) => write!(f, "invalid value: {}", msg),
            Error::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IO(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err)
    }
}
