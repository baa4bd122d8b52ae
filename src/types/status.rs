//! Task lifecycle status.
//!
//! [`TaskStatus`] is the value persisted in the record header.
//! [`ObservedStatus`] is what the probe reports, which adds `missing` for
//! tasks whose record does not exist.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TaskError;

/// Task lifecycle status.
///
/// # State Machine
///
/// ```text
/// New -> Pending -> Submitted -> Running -> Completed | Failed | Aborted
/// ```
///
/// The record accepts any explicit assignment; only the probe is restricted
/// to driving a task forward along this order or into `Aborted`. The numeric
/// codes are part of the on-disk header format and must not change.
///
/// # Examples
///
/// ```
/// use taskwatch::TaskStatus;
///
/// let status: TaskStatus = "running".parse().unwrap();
/// assert_eq!(status.code(), 3);
/// assert!(status.is_live());
/// assert!(!status.is_terminal());
/// assert!(TaskStatus::Aborted.is_terminal());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Record written, nothing scheduled yet.
    New,
    /// Parameters refreshed for a (re)submission.
    Pending,
    /// A submission script and job id exist.
    Submitted,
    /// The executor is touching the pulse file.
    Running,
    /// Killed or found dead (terminal).
    Aborted,
    /// Finished with an error (terminal).
    Failed,
    /// Finished successfully (terminal).
    Completed,
}

impl TaskStatus {
    /// Every status, in header-code order.
    pub const ALL: [TaskStatus; 7] = [
        Self::New,
        Self::Pending,
        Self::Submitted,
        Self::Running,
        Self::Aborted,
        Self::Failed,
        Self::Completed,
    ];

    /// Header code of this status.
    pub fn code(self) -> i32 {
        match self {
            Self::New => 0,
            Self::Pending => 1,
            Self::Submitted => 2,
            Self::Running => 3,
            Self::Aborted => 4,
            Self::Failed => 5,
            Self::Completed => 6,
        }
    }

    /// Decodes a header code.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidStatus`] for codes outside `0..=6`.
    pub fn from_code(code: i32) -> Result<Self, TaskError> {
        Self::ALL
            .into_iter()
            .find(|s| s.code() == code)
            .ok_or_else(|| TaskError::InvalidStatus(code.to_string()))
    }

    /// Returns `true` for `Completed`, `Failed` and `Aborted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Aborted)
    }

    /// Returns `true` for statuses whose cached evidence is never trusted
    /// (`Pending`, `Running`).
    pub fn is_live(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    /// Lower-case name, as stored in the status cache.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| TaskError::InvalidStatus(s.to_string()))
    }
}

/// Status as reported by the probe.
///
/// Serializes as a plain string (`"running"`, `"missing"`).
///
/// # Examples
///
/// ```
/// use taskwatch::{ObservedStatus, TaskStatus};
///
/// let seen = ObservedStatus::from(TaskStatus::Completed);
/// assert_eq!(seen.to_string(), "completed");
/// assert_eq!("missing".parse::<ObservedStatus>().unwrap(), ObservedStatus::Missing);
/// assert_eq!(seen.task_status(), Some(TaskStatus::Completed));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ObservedStatus {
    /// The record exists and holds this status.
    Known(TaskStatus),
    /// No record exists for the task.
    Missing,
}

impl ObservedStatus {
    /// The record status, if the record exists.
    pub fn task_status(self) -> Option<TaskStatus> {
        match self {
            Self::Known(status) => Some(status),
            Self::Missing => None,
        }
    }

    /// See [`TaskStatus::is_live`]. `Missing` is not live.
    pub fn is_live(self) -> bool {
        self.task_status().is_some_and(TaskStatus::is_live)
    }
}

impl From<TaskStatus> for ObservedStatus {
    fn from(status: TaskStatus) -> Self {
        Self::Known(status)
    }
}

impl fmt::Display for ObservedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(status) => status.fmt(f),
            Self::Missing => f.write_str("missing"),
        }
    }
}

impl FromStr for ObservedStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "missing" {
            Ok(Self::Missing)
        } else {
            s.parse().map(Self::Known)
        }
    }
}

impl TryFrom<String> for ObservedStatus {
    type Error = TaskError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ObservedStatus> for String {
    fn from(value: ObservedStatus) -> Self {
        value.to_string()
    }
}
