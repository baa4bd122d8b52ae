//! Status snapshots and the evidence that justifies them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::monitor::files::mtime_secs;
use crate::types::status::{ObservedStatus, TaskStatus};

/// Modification times (seconds since the epoch) of the files a status was
/// derived from. `0.0` records a file that was absent.
pub type Evidence = BTreeMap<PathBuf, f64>;

/// A probe verdict: the status and the file timestamps that produced it.
///
/// Snapshots are what the shared status cache stores, and what a later probe
/// receives as its hint.
///
/// # Examples
///
/// ```
/// use taskwatch::{ObservedStatus, StatusSnapshot, TaskStatus};
///
/// let snap = StatusSnapshot::new(TaskStatus::Completed)
///     .with_file("/nonexistent/t.task", 0.0);
/// assert_eq!(snap.status, ObservedStatus::Known(TaskStatus::Completed));
/// assert!(snap.evidence_unchanged());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Observed status.
    pub status: ObservedStatus,
    /// File timestamps observed alongside the status.
    pub files: Evidence,
}

impl StatusSnapshot {
    /// A snapshot with no evidence yet.
    pub fn new(status: impl Into<ObservedStatus>) -> Self {
        Self {
            status: status.into(),
            files: Evidence::new(),
        }
    }

    /// Adds one piece of evidence.
    pub fn with_file(mut self, path: impl Into<PathBuf>, mtime: f64) -> Self {
        self.files.insert(path.into(), mtime);
        self
    }

    /// The record status, if the task exists.
    pub fn task_status(&self) -> Option<TaskStatus> {
        self.status.task_status()
    }

    /// Recorded timestamp of `path`, if it is part of the evidence.
    pub fn mtime_of(&self, path: &Path) -> Option<f64> {
        self.files.get(path).copied()
    }

    /// Returns `true` when every file in the evidence still has exactly the
    /// recorded timestamp, and every file recorded absent is still absent.
    pub fn evidence_unchanged(&self) -> bool {
        self.files.iter().all(|(path, &recorded)| {
            match mtime_secs(path) {
                Some(current) => recorded != 0.0 && current == recorded,
                None => recorded == 0.0,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn evidence_tracks_presence_and_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.task");
        fs::write(&file, b"x").unwrap();
        let mtime = mtime_secs(&file).unwrap();

        let snap = StatusSnapshot::new(TaskStatus::New).with_file(&file, mtime);
        assert!(snap.evidence_unchanged());

        let absent = StatusSnapshot::new(TaskStatus::New).with_file(&file, 0.0);
        assert!(!absent.evidence_unchanged());

        let stale = StatusSnapshot::new(TaskStatus::New).with_file(&file, mtime - 10.0);
        assert!(!stale.evidence_unchanged());

        fs::remove_file(&file).unwrap();
        assert!(absent.evidence_unchanged());
        assert!(!snap.evidence_unchanged());
    }
}
