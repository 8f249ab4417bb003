use std::{error::Error, fmt};

/// The coarse classification of an error.
///
/// Transactional aborts (`DeadlockAbort`, `MultiUpgrade`) are expected
/// control flow: the caller aborts the transaction and usually retries.
/// Everything else is a real failure of the statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File not found, read/write failure, on-disk corruption.
    Io,
    /// Duplicate key, missing key, no such table, table already exists.
    Storage,
    /// Unknown column, type/size mismatch, foreign key violation.
    Schema,
    /// 2PL violation, illegal lock upgrade, tuple lock without table lock.
    InvalidBehavior,
    /// Wait-die loser. The transaction must abort and may retry.
    DeadlockAbort,
    /// A second upgrader on the same lock queue. Abort and retry.
    MultiUpgrade,
}

#[derive(Debug)]
pub struct WrenError {
    kind: ErrorKind,
    details: String,
}

impl WrenError {
    pub fn new(kind: ErrorKind, msg: &str) -> WrenError {
        WrenError {
            kind,
            details: msg.to_string(),
        }
    }

    pub fn io(msg: &str) -> WrenError {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn storage(msg: &str) -> WrenError {
        Self::new(ErrorKind::Storage, msg)
    }

    pub fn schema(msg: &str) -> WrenError {
        Self::new(ErrorKind::Schema, msg)
    }

    pub fn invalid_behavior(msg: &str) -> WrenError {
        Self::new(ErrorKind::InvalidBehavior, msg)
    }

    pub fn deadlock_abort(msg: &str) -> WrenError {
        Self::new(ErrorKind::DeadlockAbort, msg)
    }

    pub fn multi_upgrade(msg: &str) -> WrenError {
        Self::new(ErrorKind::MultiUpgrade, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Whether this error asks the caller to abort the transaction and
    /// retry, as opposed to reporting a statement failure.
    pub fn is_txn_abort(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::DeadlockAbort | ErrorKind::MultiUpgrade
        )
    }

    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        log::error!("{:?}: {}\nbacktrace:\n{:?}", self.kind, self.details, bt);
    }
}

impl fmt::Display for WrenError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.details)
    }
}

impl Error for WrenError {}

impl From<std::io::Error> for WrenError {
    fn from(e: std::io::Error) -> Self {
        WrenError::io(&e.to_string())
    }
}
