//! Error types for task record, probe, and cache operations.
//!
//! Provides [`TaskError`], a rich error enum with context fields. Errors fall
//! into four groups:
//!
//! - **race** errors (a file vanished or changed between stat and read) are
//!   retried by the probe, see [`TaskError::is_retryable`];
//! - **configuration** errors (mismatched batch resources, unknown status
//!   values, unparsable quantities) are fatal and surface immediately;
//! - **storage** errors come from the status-cache backend and are wrapped;
//! - section **decode** failures never reach this type: record accessors log
//!   them and fall back to defaults.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::store::StorageError;

/// Errors that can occur during task operations.
///
/// # Examples
///
/// ```
/// use taskwatch::TaskError;
///
/// let err = TaskError::NotFound {
///     task_id: "t1a2b3".to_string(),
/// };
/// assert!(err.to_string().contains("t1a2b3"));
/// assert!(!err.is_retryable());
/// ```
#[derive(Debug, Error)]
pub enum TaskError {
    /// Filesystem operation on a task-storage path failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// The path being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The record header could not be decoded.
    #[error("invalid task header in {}: {reason}", path.display())]
    InvalidHeader {
        /// The record file.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// A status value outside the known set was read or requested.
    #[error("unrecognized task status: {0}")]
    InvalidStatus(String),

    /// Sibling tasks pushed into one master task request different resources.
    #[error("all tasks should have the same resource {key} (expected {expected:?}, got {actual:?})")]
    ResourceMismatch {
        /// The runtime key that differs.
        key: &'static str,
        /// Value held by the first task of the batch.
        expected: Option<String>,
        /// Value of the task being pushed.
        actual: Option<String>,
    },

    /// A time or size expression could not be parsed.
    #[error("invalid {kind} expression: {value:?}")]
    InvalidQuantity {
        /// `"time"` or `"size"`.
        kind: &'static str,
        /// The offending text.
        value: String,
    },

    /// No record exists for the task.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The missing task id.
        task_id: String,
    },

    /// The probe kept observing a changing or half-written record.
    #[error("task {task_id} could not be probed consistently in {attempts} attempts")]
    ProbeRetriesExhausted {
        /// The task being probed.
        task_id: String,
        /// How many attempts were made.
        attempts: u32,
    },

    /// Another process held a lock sentinel for longer than the timeout.
    #[error("timed out waiting for lock {}", path.display())]
    LockTimeout {
        /// The sentinel path.
        path: PathBuf,
    },

    /// A record section could not be encoded.
    #[error("failed to encode {section} section: {message}")]
    Codec {
        /// The section name.
        section: &'static str,
        /// Encoder error message.
        message: String,
    },

    /// Configuration could not be parsed.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Status-cache backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, TaskError>;

impl TaskError {
    /// Builds an [`TaskError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns `true` for errors caused by a file disappearing or being
    /// rewritten underneath the caller, which a fresh attempt may resolve.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::io;
    /// use taskwatch::TaskError;
    ///
    /// let gone = TaskError::io("x.pulse", io::Error::from(io::ErrorKind::NotFound));
    /// assert!(gone.is_retryable());
    ///
    /// let fatal = TaskError::InvalidStatus("done".into());
    /// assert!(!fatal.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::UnexpectedEof
            ),
            Self::InvalidHeader { .. } => true,
            Self::Storage(StorageError::VersionConflict { .. }) => true,
            _ => false,
        }
    }
}
