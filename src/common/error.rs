//! Error types for pitrd

use thiserror::Error;

use crate::lock::LockHeader;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === Control plane ===
    #[error("metadata store: {0}")]
    Meta(String),

    #[error("lock service: {0}")]
    Lock(String),

    #[error("concurrent operation holds the lock {0}")]
    ConcurrentOp(LockHeader),

    #[error("timeout while {0}")]
    Timeout(&'static str),

    // === Slicing ===
    #[error("catchup: {0}")]
    Catchup(String),

    #[error("streaming oplog: {0}")]
    OplogStream(String),

    #[error("operation moved to another node")]
    OpMoved,

    // === Local ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Concurrent operations are a pause condition, not a failure.
    pub fn is_concurrent_op(&self) -> bool {
        matches!(self, Error::ConcurrentOp(_))
    }

    /// Cooperative shutdown; callers skip logging these.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
