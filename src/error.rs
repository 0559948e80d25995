//! Error taxonomy for the sync engine.
//!
//! Every failure the engine can report is a [`SyncError`], and every
//! `SyncError` falls into exactly one [`ErrorKind`]. Call sites never
//! decide on their own whether a failure is fatal: per-file code logs and
//! continues on [`ErrorKind::Transient`], and the single top-level handler
//! in the CLI exits on [`ErrorKind::Fatal`].

use std::path::PathBuf;

use thiserror::Error;

pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Closed classification of engine failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Affects one file or one request. Log, skip, carry on.
    Transient,
    /// A whole subsystem cannot proceed. Terminate.
    Fatal,
    /// The addressed path is unknown.
    NotFound,
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger at {path} is corrupt: {reason}")]
    CorruptLedger { path: PathBuf, reason: String },

    #[error("failed to persist ledger to {path}: {source}")]
    LedgerWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("extraction failed for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("file {path} is {size} bytes, above the {limit} byte limit")]
    TooLarge { path: PathBuf, size: u64, limit: u64 },

    #[error("vector index error: {0:#}")]
    Index(anyhow::Error),

    #[error("vector index unavailable: {0:#}")]
    IndexUnavailable(anyhow::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("engine is still running its startup reconciliation")]
    NotReady,

    #[error("unknown document: {0}")]
    NotFound(String),

    #[error("path {0} is outside the documents directory")]
    OutsideRoot(String),

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SyncError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::CorruptLedger { .. }
            | SyncError::IndexUnavailable(_)
            | SyncError::Config(_)
            | SyncError::Watch(_) => ErrorKind::Fatal,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Io { .. }
            | SyncError::LedgerWrite { .. }
            | SyncError::Extraction { .. }
            | SyncError::TooLarge { .. }
            | SyncError::Index(_)
            | SyncError::NotReady
            | SyncError::OutsideRoot(_)
            | SyncError::Join(_) => ErrorKind::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}
