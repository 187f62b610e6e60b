//! Directory error types
//!
//! Every failure to persist the directory aborts the mutating request.
//! FATAL errors mean the log can no longer be trusted: either the writer is
//! poisoned and refuses mutations until restart, or replay found damage.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Severity levels for directory errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// The request fails, the directory stays usable
    Error,
    /// The log cannot be trusted any more
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Result type for directory operations
pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Directory errors
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// `rolled_back` is false when the partial write could not be cut off
    /// again, which poisons the writer.
    #[error("failed to append directory log entry {sequence}: {source}")]
    AppendFailed {
        sequence: u64,
        rolled_back: bool,
        #[source]
        source: io::Error,
    },

    #[error("directory log entry of {len} bytes exceeds the {max} byte limit")]
    EntryTooLarge { len: usize, max: usize },

    #[error("fsync failed after directory log entry {sequence}: {source}")]
    FsyncFailed {
        sequence: u64,
        #[source]
        source: io::Error,
    },

    #[error("directory log corrupt at byte {offset}: {reason}")]
    Corruption { offset: u64, reason: String },

    #[error("directory log ends mid-record at byte {offset}")]
    TornTail { offset: u64 },

    #[error("directory compaction failed: {0}")]
    CompactionFailed(String),

    #[error("directory writer is poisoned after an earlier fatal error")]
    Poisoned,

    #[error("file id already registered: {0}")]
    Duplicate(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to encode directory record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DirectoryError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        DirectoryError::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        match self {
            DirectoryError::FsyncFailed { .. }
            | DirectoryError::Corruption { .. }
            | DirectoryError::CompactionFailed(_)
            | DirectoryError::Poisoned
            | DirectoryError::AppendFailed {
                rolled_back: false, ..
            } => Severity::Fatal,
            _ => Severity::Error,
        }
    }

    /// Returns whether the log can no longer be trusted after this error
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}
