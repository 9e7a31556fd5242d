use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::domain::TaskId;
use crate::queue::TaskState;

/// Operational classification of a failure.
///
/// - Transient: the backing document was briefly unavailable; retrying helps.
/// - Corrupt: a document exists but fails structural validation.
/// - InvalidInput: the caller asked for something malformed.
/// - Infrastructure: the filesystem refused in a way retries will not fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Corrupt,
    InvalidInput,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum ForemanError {
    #[error("transient I/O failure on {path} after {attempts} attempts: {source}")]
    TransientIo {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("I/O failure on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt {kind} document at {path}: {reason}")]
    CorruptState {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("invalid config at {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {task} cannot move from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("invalid situation signature: {0:?}")]
    InvalidSignature(String),

    #[error("invalid value for {field}: {value:?}")]
    InvalidArgument { field: &'static str, value: String },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("blocking store call did not finish: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ForemanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForemanError::TransientIo { .. } => ErrorKind::Transient,
            ForemanError::CorruptState { .. } => ErrorKind::Corrupt,
            ForemanError::Io { .. } | ForemanError::Json(_) | ForemanError::Join(_) => {
                ErrorKind::Infrastructure
            }
            ForemanError::Config { .. }
            | ForemanError::TaskNotFound(_)
            | ForemanError::InvalidTransition { .. }
            | ForemanError::InvalidSignature(_)
            | ForemanError::InvalidArgument { .. } => ErrorKind::InvalidInput,
        }
    }

    /// Backing-store failures a caller cannot recover from.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Infrastructure)
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ForemanError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForemanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_and_io_errors_are_unrecoverable() {
        let transient = ForemanError::TransientIo {
            path: PathBuf::from("queue.json"),
            attempts: 4,
            source: io::Error::from(io::ErrorKind::TimedOut),
        };
        assert_eq!(transient.kind(), ErrorKind::Transient);
        assert!(transient.is_unrecoverable());

        let missing = ForemanError::TaskNotFound(TaskId::new("t1"));
        assert_eq!(missing.kind(), ErrorKind::InvalidInput);
        assert!(!missing.is_unrecoverable());
        assert!(missing.to_string().contains("t1"));
    }
}
