//! Task status monitoring and cleanup.
//!
//! The free functions [`check_task`], [`check_tasks`] and [`kill_task`] are
//! the building blocks; [`TaskMonitor`] bundles a configuration with a
//! status-cache backend and adds selection, bulk kill, purge and status
//! queries on top.
//!
//! # Examples
//!
//! ```
//! use taskwatch::monitor::{TaskMonitor, TaskSelector};
//! use taskwatch::store::InMemoryStatusCache;
//! use taskwatch::{ObservedStatus, TaskFile, TaskParams, TaskStatus, TaskStoreConfig};
//!
//! let root = tempfile::tempdir().unwrap();
//! let config = TaskStoreConfig::new(root.path());
//! TaskFile::new(&config, "t1").save(TaskParams::default()).unwrap();
//!
//! let monitor = TaskMonitor::new(config).with_cache(InMemoryStatusCache::new());
//! let report = monitor.query_status(&TaskSelector::all()).unwrap();
//! assert_eq!(report.len(), 1);
//! assert_eq!(report[0].status, ObservedStatus::Known(TaskStatus::New));
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::TaskStoreConfig;
use crate::domain::header::now_secs;
use crate::domain::TaskFile;
use crate::error::Result;
use crate::store::{update_cache, FileStatusCache, StatusCacheBackend, StatusCacheMap};
use crate::types::{ObservedStatus, StatusSnapshot, TaskStatus};

pub mod cleanup;
pub mod files;
pub mod probe;
pub mod select;
pub mod sweep;

pub use cleanup::kill_task;
pub use probe::check_task;
pub use select::{AgeFilter, SelectedTask, TaskSelector};
pub use sweep::check_tasks;

/// One line of a status report.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatusEntry {
    /// Task id.
    pub task_id: String,
    /// Status observed by the sweep.
    pub status: ObservedStatus,
    /// Record modification time, `None` for a missing task.
    pub modified: Option<f64>,
}

/// Monitors the tasks of one task directory.
pub struct TaskMonitor {
    config: TaskStoreConfig,
    cache: Arc<dyn StatusCacheBackend>,
}

impl std::fmt::Debug for TaskMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TaskMonitor {
    /// A monitor using the file status cache of the task directory.
    pub fn new(config: TaskStoreConfig) -> Self {
        let cache = FileStatusCache::from_config(&config);
        Self {
            config,
            cache: Arc::new(cache),
        }
    }

    /// Replaces the status-cache backend.
    pub fn with_cache(mut self, cache: impl StatusCacheBackend + 'static) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    /// The configuration.
    pub fn config(&self) -> &TaskStoreConfig {
        &self.config
    }

    /// The status-cache backend.
    pub fn cache(&self) -> &dyn StatusCacheBackend {
        self.cache.as_ref()
    }

    /// Handle on the record of `task_id`.
    pub fn record(&self, task_id: &str) -> TaskFile {
        TaskFile::new(&self.config, task_id)
    }

    /// Probes one task, using and refreshing its cached snapshot.
    pub fn check_task(&self, task_id: &str) -> Result<StatusSnapshot> {
        let hint = self.cache.load()?.entries.remove(task_id);
        match check_task(&self.config, task_id, hint.as_ref())? {
            Some(snapshot) => {
                let stored = update_cache(self.cache.as_ref(), |entries| {
                    entries.insert(task_id.to_string(), snapshot.clone());
                    true
                });
                if let Err(e) = stored {
                    tracing::warn!("Failed to save status cache: {e}");
                }
                Ok(snapshot)
            },
            // `check_task` only reports "unchanged" against a hint.
            None => Ok(hint.unwrap_or_else(|| StatusSnapshot::new(ObservedStatus::Missing))),
        }
    }

    /// Probes several tasks in parallel, see [`check_tasks`].
    pub fn check_tasks(&self, task_ids: &[String], full_sweep: bool) -> StatusCacheMap {
        check_tasks(&self.config, self.cache.as_ref(), task_ids, full_sweep)
    }

    /// Kills one task, see [`kill_task`].
    pub fn kill_task(&self, task_id: &str) -> Result<TaskStatus> {
        kill_task(&self.config, task_id)
    }

    /// Kills every task picked by the id, age and tag filters of `selector`
    /// (its status filter is not consulted). Kills run in parallel.
    pub fn kill_tasks(&self, selector: &TaskSelector) -> Result<Vec<(String, Result<TaskStatus>)>> {
        let selected = select::select(&self.config, selector, false)?;
        if selected.is_empty() {
            tracing::warn!("No task to kill");
            return Ok(Vec::new());
        }
        let mut ids: Vec<String> = selected.into_iter().map(|t| t.task_id).collect();
        ids.sort();
        let outcomes = sweep::parallel_map(self.config.max_probe_workers, &ids, |id| {
            kill_task(&self.config, id)
        });
        Ok(ids.into_iter().zip(outcomes).collect())
    }

    /// Tasks matching every filter of `selector`, oldest first. A status
    /// filter triggers a sweep over the candidates.
    pub fn select_tasks(&self, selector: &TaskSelector) -> Result<Vec<SelectedTask>> {
        let mut selected = select::select(&self.config, selector, false)?;
        if !selector.statuses.is_empty() && !selected.is_empty() {
            let statuses = self.sweep(&selected, selector.is_full_sweep());
            selected.retain(|task| {
                statuses
                    .get(&task.task_id)
                    .and_then(StatusSnapshot::task_status)
                    .is_some_and(|s| selector.statuses.contains(&s))
            });
        }
        Ok(selected)
    }

    /// Deletes the files and cache entries of every selected task; with
    /// `purge_all`, then empties the task directory entirely. Returns the
    /// ids that were removed cleanly.
    pub fn purge_tasks(&self, selector: &TaskSelector, purge_all: bool) -> Result<Vec<String>> {
        let selected = self.select_tasks(selector)?;
        let ids: BTreeSet<String> = selected.into_iter().map(|t| t.task_id).collect();
        let purged = if ids.is_empty() {
            tracing::info!("No matching tasks");
            Vec::new()
        } else {
            cleanup::purge_task_ids(&self.config, self.cache.as_ref(), &ids)
        };
        if purge_all {
            cleanup::wipe_tasks_dir(&self.config);
        }
        Ok(purged)
    }

    /// Status report for the selected tasks.
    ///
    /// Requested ids that match nothing are reported as missing. Afterwards,
    /// tasks last modified more than `stale_after` ago that are not running
    /// are purged; they still appear in this report.
    pub fn query_status(&self, selector: &TaskSelector) -> Result<Vec<TaskStatusEntry>> {
        let selected = select::select(&self.config, selector, true)?;
        if selected.is_empty() {
            tracing::info!("No matching tasks");
            return Ok(Vec::new());
        }

        let statuses = self.sweep(&selected, selector.is_full_sweep());
        let mut report: Vec<TaskStatusEntry> = selected
            .into_iter()
            .map(|task| {
                let status = statuses
                    .get(&task.task_id)
                    .map(|snap| snap.status)
                    .unwrap_or_else(|| self.read_status(&task.task_id));
                TaskStatusEntry {
                    task_id: task.task_id,
                    status,
                    modified: task.modified,
                }
            })
            .collect();

        let now = now_secs();
        let stale_after = self.config.stale_after.as_secs_f64();
        let stale: BTreeSet<String> = report
            .iter()
            .filter(|entry| {
                entry.status != ObservedStatus::Known(TaskStatus::Running)
                    && entry.modified.is_some_and(|m| now - m > stale_after)
            })
            .map(|entry| entry.task_id.clone())
            .collect();

        if !selector.statuses.is_empty() {
            report.retain(|entry| {
                entry
                    .status
                    .task_status()
                    .is_some_and(|s| selector.statuses.contains(&s))
            });
        }

        if !stale.is_empty() {
            tracing::debug!("Removing {} tasks idle for longer than {stale_after}s", stale.len());
            cleanup::purge_task_ids(&self.config, self.cache.as_ref(), &stale);
        }
        Ok(report)
    }

    fn sweep(&self, selected: &[SelectedTask], full_sweep: bool) -> StatusCacheMap {
        let ids: Vec<String> = selected.iter().map(|t| t.task_id.clone()).collect();
        check_tasks(&self.config, self.cache.as_ref(), &ids, full_sweep)
    }

    /// Status straight from the record, for tasks the sweep could not probe.
    fn read_status(&self, task_id: &str) -> ObservedStatus {
        self.record(task_id)
            .status()
            .map_or(ObservedStatus::Missing, ObservedStatus::Known)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStatusCache;
    use crate::types::TaskParams;
    use pretty_assertions::assert_eq;

    fn monitor() -> (tempfile::TempDir, TaskMonitor) {
        let dir = tempfile::tempdir().unwrap();
        let monitor =
            TaskMonitor::new(TaskStoreConfig::new(dir.path())).with_cache(InMemoryStatusCache::new());
        (dir, monitor)
    }

    #[test]
    fn check_task_caches_fresh_snapshots() {
        let (_dir, monitor) = monitor();
        monitor.record("c1").save(TaskParams::default()).unwrap();
        let snap = monitor.check_task("c1").unwrap();
        assert_eq!(snap.status, ObservedStatus::Known(TaskStatus::New));
        assert_eq!(monitor.cache().load().unwrap().entries["c1"], snap);

        // Unchanged evidence: the cached snapshot comes back as is.
        assert_eq!(monitor.check_task("c1").unwrap(), snap);
        assert_eq!(monitor.cache().load().unwrap().version, 1);
    }

    #[test]
    fn missing_ids_are_reported() {
        let (_dir, monitor) = monitor();
        let report = monitor
            .query_status(&TaskSelector::all().with_ids(["ghost"]))
            .unwrap();
        assert_eq!(
            report,
            vec![TaskStatusEntry {
                task_id: "ghost".into(),
                status: ObservedStatus::Missing,
                modified: None,
            }]
        );
    }

    #[test]
    fn status_filter_selects_by_probe_result() {
        let (_dir, monitor) = monitor();
        monitor.record("s1").save(TaskParams::default()).unwrap();
        monitor.record("s2").save(TaskParams::default()).unwrap();
        monitor.record("s2").set_status(TaskStatus::Failed).unwrap();

        let failed = monitor
            .select_tasks(&TaskSelector::all().with_statuses([TaskStatus::Failed]))
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].task_id, "s2");
    }

    #[test]
    fn kill_tasks_reports_each_outcome() {
        let (_dir, monitor) = monitor();
        monitor.record("k1").save(TaskParams::default()).unwrap();
        monitor.record("k2").save(TaskParams::default()).unwrap();
        monitor.record("k2").set_status(TaskStatus::Completed).unwrap();

        let outcomes = monitor.kill_tasks(&TaskSelector::all()).unwrap();
        let summary: Vec<(String, TaskStatus)> = outcomes
            .into_iter()
            .map(|(id, r)| (id, r.unwrap()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("k1".to_string(), TaskStatus::Aborted),
                ("k2".to_string(), TaskStatus::Completed)
            ]
        );
    }
}
