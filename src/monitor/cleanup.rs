//! Killing and purging tasks.

use std::collections::BTreeSet;
use std::fs;
use std::io;

use walkdir::WalkDir;

use crate::config::TaskStoreConfig;
use crate::constants::{KILLED_TASK_FILES, PULSE_EXT};
use crate::domain::TaskFile;
use crate::error::{Result, TaskError};
use crate::monitor::files::{make_readonly, remove_or_defer, remove_task_files};
use crate::store::{update_cache, StatusCacheBackend};
use crate::types::TaskStatus;

/// Stops `task_id`.
///
/// A completed task is left alone and `Completed` is returned. Otherwise
/// the submission and output companions are removed, a remaining pulse file
/// is made read-only (which tells a live executor, and any later probe, that
/// the task was killed), and the record is forced to `Aborted`.
///
/// # Errors
///
/// [`TaskError::NotFound`] if there is no record for `task_id`.
pub fn kill_task(config: &TaskStoreConfig, task_id: &str) -> Result<TaskStatus> {
    let record = TaskFile::new(config, task_id);
    let status = record.status().map_err(|e| match e {
        TaskError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => {
            TaskError::NotFound {
                task_id: task_id.to_string(),
            }
        },
        other => other,
    })?;
    if status == TaskStatus::Completed {
        return Ok(TaskStatus::Completed);
    }

    remove_task_files(&config.tasks_dir(), task_id, &KILLED_TASK_FILES);
    let pulse = config.companion_file(task_id, PULSE_EXT);
    if pulse.is_file() {
        if let Err(e) = make_readonly(&pulse) {
            tracing::warn!("Failed to revoke write access to {}: {e}", pulse.display());
        }
    }
    record.set_status(TaskStatus::Aborted)?;
    tracing::info!("Task {task_id} killed");
    Ok(TaskStatus::Aborted)
}

/// Removes every file under the task directory belonging to one of
/// `task_ids` (the part of the file name before its first `.` is the id),
/// and drops their status-cache entries.
///
/// Individual failures are logged and do not stop the batch. Returns the
/// ids whose files were all removed.
pub(crate) fn purge_task_ids<B>(
    config: &TaskStoreConfig,
    cache: &B,
    task_ids: &BTreeSet<String>,
) -> Vec<String>
where
    B: StatusCacheBackend + ?Sized,
{
    if task_ids.is_empty() {
        return Vec::new();
    }

    let mut failed = BTreeSet::new();
    for entry in WalkDir::new(config.tasks_dir())
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let name = entry.file_name().to_string_lossy();
        let id = name.split('.').next().unwrap_or_default();
        if !task_ids.contains(id) {
            continue;
        }
        tracing::trace!("Remove {}", entry.path().display());
        if !remove_or_defer(entry.path()) {
            tracing::warn!("Failed to purge task {id}");
            failed.insert(id.to_string());
        }
    }

    let dropped = update_cache(cache, |entries| {
        let before = entries.len();
        entries.retain(|id, _| !task_ids.contains(id));
        entries.len() != before
    });
    if let Err(e) = dropped {
        tracing::warn!("Failed to update status cache after purge: {e}");
    }

    task_ids
        .iter()
        .filter(|id| !failed.contains(*id))
        .inspect(|id| tracing::info!("Task {id} removed"))
        .cloned()
        .collect()
}

/// Removes everything inside the task directory. Returns how many entries
/// were removed.
pub(crate) fn wipe_tasks_dir(config: &TaskStoreConfig) -> usize {
    let tasks_dir = config.tasks_dir();
    let entries = match fs::read_dir(&tasks_dir) {
        Ok(entries) => entries,
        Err(e) => {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!("Failed to list {}: {e}", tasks_dir.display());
            }
            return 0;
        },
    };
    let mut count = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match removed {
            Ok(()) => count += 1,
            Err(e) => tracing::warn!("Failed to remove {}: {e}", path.display()),
        }
    }
    if count > 0 {
        tracing::info!("{count} other files and directories are removed");
    }
    count
}
