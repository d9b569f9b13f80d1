//! Error taxonomy for a collection run
//!
//! Only the lock variants are fatal. Everything else is recovered inline by
//! the coordinator and surfaces through logs and the run report.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectorError {
    /// Another run holds the single-instance lock
    #[error("another collector run holds the lock at {}", path.display())]
    RunConflict { path: PathBuf },

    /// The lock file itself could not be opened
    #[error("could not open lock file {}: {source}", path.display())]
    LockIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A source could not be listed or diffed
    #[error("could not enumerate source {source_id}: {message}")]
    SourceEnumeration { source_id: String, message: String },

    /// A candidate could not be probed, copied or read
    #[error("could not extract {}: {message}", path.display())]
    Extraction { path: PathBuf, message: String },

    /// Network error or unexpected status, eligible for retry
    #[error("transient submission failure: {0}")]
    TransientSubmission(String),

    /// Retries exhausted or artifact unusable
    #[error("submission of {artifact} failed: {reason}")]
    PermanentSubmission { artifact: String, reason: String },

    /// History or results file could not be read or written
    #[error("could not persist {}: {message}", path.display())]
    Persistence { path: PathBuf, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CollectorError {
    /// Whether this error must abort the run
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollectorError::RunConflict { .. } | CollectorError::LockIo { .. }
        )
    }

    pub(crate) fn extraction(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        CollectorError::Extraction {
            path: path.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        CollectorError::Persistence {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
