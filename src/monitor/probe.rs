//! The liveness probe: infer a task's status from its record and companions.
//!
//! No executor reports back directly. What the probe has is the record
//! status, the record's mtime, and the mtimes of the files the executor
//! leaves behind:
//!
//! | Evidence                                          | Verdict      |
//! |---------------------------------------------------|--------------|
//! | record says completed / failed / aborted          | that status  |
//! | pulse read-only                                   | aborted      |
//! | pulse touched within `monitor_interval`           | running      |
//! | pulse silent for more than twice that             | aborted      |
//! | pulse in between, then touched during a wait      | running      |
//! | `.sh` newer than record and `.job_id` newer still | submitted    |
//! | otherwise                                         | record status|
//!
//! A pulse older than the record (by more than a second of clock slack) is
//! left over from an earlier run and ignored. Whenever the record itself
//! changes while the probe looks at it, or a file vanishes between stat and
//! read, the probe starts over, at most `max_probe_retries` times.

use std::path::PathBuf;
use std::thread;

use crate::config::TaskStoreConfig;
use crate::constants::{DEAD_TASK_FILES, JOB_ID_EXT, PULSE_EXT, SCRIPT_EXT};
use crate::domain::header::now_secs;
use crate::domain::TaskFile;
use crate::error::{Result, TaskError};
use crate::monitor::files::{is_readonly, mtime_secs, remove_task_files};
use crate::types::{ObservedStatus, StatusSnapshot, TaskStatus};

/// Clock slack allowed between a pulse file and the record it belongs to.
const PULSE_SLACK_SECS: f64 = 1.0;

/// Outcome of one probe attempt.
enum Attempt {
    /// `None` means "same as the hint".
    Done(Option<StatusSnapshot>),
    /// The record changed underneath the probe.
    Retry,
}

/// Determines the current status of `task_id`.
///
/// Returns `Ok(None)` when `hint` is still accurate and the caller may keep
/// it, otherwise a fresh snapshot. Status transitions discovered along the
/// way (running, submitted, aborted) are written back into the record, and
/// the companion files of a dead task are removed.
///
/// May block for up to twice `monitor_interval` when the pulse is neither
/// clearly fresh nor clearly stale.
///
/// # Errors
///
/// [`TaskError::ProbeRetriesExhausted`] if the record kept changing or kept
/// failing with a retryable error, otherwise the error that interrupted an
/// attempt while the record stayed put.
///
/// # Examples
///
/// ```
/// use taskwatch::monitor::check_task;
/// use taskwatch::{ObservedStatus, TaskStoreConfig};
///
/// let root = tempfile::tempdir().unwrap();
/// let config = TaskStoreConfig::new(root.path());
///
/// let snapshot = check_task(&config, "nosuch", None).unwrap().unwrap();
/// assert_eq!(snapshot.status, ObservedStatus::Missing);
///
/// // The same evidence again: nothing new to report.
/// assert_eq!(check_task(&config, "nosuch", Some(&snapshot)).unwrap(), None);
/// ```
pub fn check_task(
    config: &TaskStoreConfig,
    task_id: &str,
    hint: Option<&StatusSnapshot>,
) -> Result<Option<StatusSnapshot>> {
    if let Some(hint) = hint {
        if !hint.status.is_live() && hint.evidence_unchanged() {
            return Ok(None);
        }
    }

    let probe = Probe::new(config, task_id);
    let mut hint = hint;
    let mut attempts = 0;
    loop {
        attempts += 1;
        match probe.attempt(hint)? {
            Attempt::Done(result) => return Ok(result),
            Attempt::Retry if attempts <= config.max_probe_retries => {
                tracing::debug!("Task {task_id} changed while being probed, checking again");
                // A changed record invalidates whatever the hint said.
                hint = None;
            },
            Attempt::Retry => {
                return Err(TaskError::ProbeRetriesExhausted {
                    task_id: task_id.to_string(),
                    attempts,
                })
            },
        }
    }
}

struct Probe<'a> {
    config: &'a TaskStoreConfig,
    record: TaskFile,
    task_file: PathBuf,
    pulse_file: PathBuf,
    job_file: PathBuf,
    job_id_file: PathBuf,
}

impl<'a> Probe<'a> {
    fn new(config: &'a TaskStoreConfig, task_id: &str) -> Self {
        Self {
            config,
            record: TaskFile::new(config, task_id),
            task_file: config.task_file(task_id),
            pulse_file: config.companion_file(task_id, PULSE_EXT),
            job_file: config.companion_file(task_id, SCRIPT_EXT),
            job_id_file: config.companion_file(task_id, JOB_ID_EXT),
        }
    }

    fn task_id(&self) -> &str {
        self.record.task_id()
    }

    fn attempt(&self, hint: Option<&StatusSnapshot>) -> Result<Attempt> {
        let Some(task_mtime) = mtime_secs(&self.task_file) else {
            return Ok(Attempt::Done(Some(
                StatusSnapshot::new(ObservedStatus::Missing).with_file(&self.task_file, 0.0),
            )));
        };

        match self.inspect(task_mtime, hint) {
            Ok(attempt) => Ok(attempt),
            Err(e) if e.is_retryable() || self.record_changed(task_mtime) => {
                tracing::debug!("Probe of task {} interrupted: {e}", self.task_id());
                Ok(Attempt::Retry)
            },
            Err(e) => Err(e),
        }
    }

    fn record_changed(&self, since: f64) -> bool {
        mtime_secs(&self.task_file) != Some(since)
    }

    fn inspect(&self, task_mtime: f64, hint: Option<&StatusSnapshot>) -> Result<Attempt> {
        let status = self.record.status()?;
        if status.is_terminal() {
            return Ok(self.verdict(status, &[&self.task_file]));
        }

        if let Some(pulse_mtime) = mtime_secs(&self.pulse_file) {
            if pulse_mtime >= task_mtime - PULSE_SLACK_SECS {
                return self.judge_pulse(status, task_mtime, pulse_mtime, hint);
            }
        }

        if self.has_job(task_mtime) {
            self.transition(status, TaskStatus::Submitted)?;
            return Ok(self.verdict(
                TaskStatus::Submitted,
                &[&self.task_file, &self.job_file, &self.pulse_file],
            ));
        }

        if let Some(hint) = hint {
            let waiting = matches!(
                hint.task_status(),
                Some(TaskStatus::New | TaskStatus::Pending)
            );
            if waiting && hint.mtime_of(&self.task_file) == Some(task_mtime) {
                return Ok(Attempt::Done(None));
            }
        }
        Ok(self.verdict(status, &[&self.task_file, &self.job_file]))
    }

    fn judge_pulse(
        &self,
        status: TaskStatus,
        task_mtime: f64,
        pulse_mtime: f64,
        hint: Option<&StatusSnapshot>,
    ) -> Result<Attempt> {
        if is_readonly(&self.pulse_file) {
            tracing::debug!("Pulse of task {} is read-only, task was killed", self.task_id());
            return self.abort(status);
        }

        let interval = self.config.monitor_interval.as_secs_f64();
        let elapsed = now_secs() - pulse_mtime;
        if elapsed < 0.0 {
            tracing::debug!(
                "{} is modified in the future. Your system time might be problematic",
                self.pulse_file.display()
            );
        }

        if elapsed < interval {
            return self.running(status, hint);
        }
        if elapsed > 2.0 * interval {
            if self.record_changed(task_mtime) {
                return Ok(Attempt::Retry);
            }
            tracing::debug!(
                "Pulse of task {} silent for {elapsed:.1}s, task is dead",
                self.task_id()
            );
            return self.abort(status);
        }

        thread::sleep(self.config.monitor_interval * 2);
        let end_mtime = mtime_secs(&self.pulse_file);
        if self.record_changed(task_mtime) {
            return Ok(Attempt::Retry);
        }
        match end_mtime {
            Some(end) if end != pulse_mtime => self.running(status, hint),
            Some(_) => self.abort(status),
            None => Err(TaskError::io(
                &self.pulse_file,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
        }
    }

    fn running(&self, status: TaskStatus, hint: Option<&StatusSnapshot>) -> Result<Attempt> {
        self.transition(status, TaskStatus::Running)?;
        if hint.and_then(StatusSnapshot::task_status) == Some(TaskStatus::Running) {
            return Ok(Attempt::Done(None));
        }
        Ok(self.verdict(TaskStatus::Running, &[&self.task_file, &self.pulse_file]))
    }

    fn abort(&self, status: TaskStatus) -> Result<Attempt> {
        remove_task_files(&self.config.tasks_dir(), self.task_id(), &DEAD_TASK_FILES);
        self.transition(status, TaskStatus::Aborted)?;
        Ok(self.verdict(TaskStatus::Aborted, &[&self.task_file, &self.pulse_file]))
    }

    fn transition(&self, current: TaskStatus, next: TaskStatus) -> Result<()> {
        if current != next {
            tracing::debug!("Task {} is {next} (was {current})", self.task_id());
            self.record.set_status(next)?;
        }
        Ok(())
    }

    /// `.sh` at least as new as the record, `.job_id` at least as new as `.sh`.
    fn has_job(&self, task_mtime: f64) -> bool {
        match (mtime_secs(&self.job_file), mtime_secs(&self.job_id_file)) {
            (Some(job), Some(job_id)) => job >= task_mtime && job_id >= job,
            _ => false,
        }
    }

    /// A snapshot whose evidence is stat'ed after any write the probe made.
    fn verdict(&self, status: TaskStatus, files: &[&PathBuf]) -> Attempt {
        let snapshot = files.iter().fold(StatusSnapshot::new(status), |snap, path| {
            snap.with_file(path.as_path(), mtime_secs(path).unwrap_or(0.0))
        });
        Attempt::Done(Some(snapshot))
    }
}
