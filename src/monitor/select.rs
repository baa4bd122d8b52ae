//! Choosing which tasks an operation applies to.

use std::collections::BTreeSet;
use std::str::FromStr;

use crate::config::TaskStoreConfig;
use crate::constants::TASK_EXT;
use crate::domain::header::now_secs;
use crate::domain::{list_task_ids, TaskFile};
use crate::error::{Result, TaskError};
use crate::monitor::files::mtime_secs;
use crate::quantity::{expand_time, TimeUnit};
use crate::types::TaskStatus;

/// Record age window.
///
/// Parsed from a time expression whose bare numbers are days. A positive
/// age selects records at least that old, a negative one records at most
/// that old.
///
/// # Examples
///
/// ```
/// use taskwatch::monitor::AgeFilter;
///
/// let older = AgeFilter::parse("2").unwrap();
/// assert!(older.matches(0.0, 3.0 * 86_400.0));
/// assert!(!older.matches(0.0, 86_400.0));
///
/// let newer: AgeFilter = "-1h".parse().unwrap();
/// assert!(newer.matches(1_000.0, 1_600.0));
/// assert!(!newer.matches(0.0, 7_200.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgeFilter {
    seconds: f64,
}

impl AgeFilter {
    /// Parses `"3d"`, `"-12h"`, `"2"` (days) and the like.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(Self {
            seconds: expand_time(text, TimeUnit::Days)?,
        })
    }

    /// A filter for records at least `seconds` old.
    pub fn older_than(seconds: f64) -> Self {
        Self {
            seconds: seconds.abs(),
        }
    }

    /// A filter for records at most `seconds` old.
    pub fn newer_than(seconds: f64) -> Self {
        Self {
            seconds: -seconds.abs(),
        }
    }

    /// Whether a record modified at `mtime` passes at time `now`.
    pub fn matches(&self, mtime: f64, now: f64) -> bool {
        let age = now - mtime;
        if self.seconds > 0.0 {
            age >= self.seconds
        } else {
            age <= -self.seconds
        }
    }
}

impl FromStr for AgeFilter {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Filters that pick tasks. All given filters must hold.
///
/// # Examples
///
/// ```
/// use taskwatch::monitor::TaskSelector;
/// use taskwatch::TaskStatus;
///
/// let selector = TaskSelector::all()
///     .with_ids(["t1a"])
///     .with_statuses([TaskStatus::Failed, TaskStatus::Aborted])
///     .with_tags(["nightly"]);
/// assert!(!selector.is_full_sweep());
/// ```
#[derive(Debug, Clone, Default)]
pub struct TaskSelector {
    /// Task id prefixes; empty selects every task.
    pub ids: Vec<String>,
    /// Record age window.
    pub age: Option<AgeFilter>,
    /// Accepted statuses; empty accepts all.
    pub statuses: Vec<TaskStatus>,
    /// Accepted tags; a task passes if it carries any of them. Empty
    /// accepts all.
    pub tags: Vec<String>,
}

impl TaskSelector {
    /// Selects every task.
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to tasks whose id starts with one of `prefixes`.
    pub fn with_ids<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Restricts by record age.
    pub fn with_age(mut self, age: AgeFilter) -> Self {
        self.age = Some(age);
        self
    }

    /// Restricts to tasks currently in one of `statuses`.
    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Restricts to tasks carrying any of `tags`.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the selection covers the whole task directory, in which case
    /// a sweep over it may rebuild the status cache.
    pub fn is_full_sweep(&self) -> bool {
        self.ids.is_empty()
    }
}

/// A task picked by a [`TaskSelector`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedTask {
    /// Full task id.
    pub task_id: String,
    /// Record modification time; `None` for a requested id with no record.
    pub modified: Option<f64>,
}

/// Resolves id prefixes, then applies the age and tag filters. The status
/// filter needs a probe and is left to the caller.
///
/// With `keep_unmatched`, a requested id that matches no record is kept
/// (with no mtime) so it can be reported missing; otherwise it is dropped
/// with a warning. Results are ordered by modification time.
pub(crate) fn select(
    config: &TaskStoreConfig,
    selector: &TaskSelector,
    keep_unmatched: bool,
) -> Result<Vec<SelectedTask>> {
    let tasks_dir = config.tasks_dir();
    let mut found: Vec<SelectedTask> = Vec::new();
    if selector.ids.is_empty() {
        found.extend(
            list_task_ids(&tasks_dir)?
                .into_iter()
                .map(|(task_id, mtime)| SelectedTask {
                    task_id,
                    modified: Some(mtime),
                }),
        );
    } else {
        for prefix in &selector.ids {
            let matched = match_prefix(config, prefix)?;
            if matched.is_empty() {
                if keep_unmatched {
                    found.push(SelectedTask {
                        task_id: prefix.clone(),
                        modified: None,
                    });
                } else {
                    tracing::warn!("{prefix} does not match any existing task");
                }
            }
            found.extend(matched);
        }
    }

    let mut seen = BTreeSet::new();
    found.retain(|task| seen.insert(task.task_id.clone()));

    if let Some(age) = &selector.age {
        let now = now_secs();
        found.retain(|task| task.modified.is_some_and(|mtime| age.matches(mtime, now)));
    }

    if !selector.tags.is_empty() {
        found.retain(|task| {
            match TaskFile::new(config, &task.task_id).tags() {
                Ok(tags) => tags.iter().any(|t| selector.tags.contains(t)),
                Err(e) => {
                    tracing::debug!("Cannot read tags of task {}: {e}", task.task_id);
                    false
                },
            }
        });
    }

    found.sort_by(|a, b| {
        a.modified
            .unwrap_or(0.0)
            .total_cmp(&b.modified.unwrap_or(0.0))
            .then_with(|| a.task_id.cmp(&b.task_id))
    });
    Ok(found)
}

fn match_prefix(config: &TaskStoreConfig, prefix: &str) -> Result<Vec<SelectedTask>> {
    let tasks_dir = config.tasks_dir();
    let pattern = format!(
        "{}/{}*{TASK_EXT}",
        glob::Pattern::escape(&tasks_dir.to_string_lossy()),
        glob::Pattern::escape(prefix)
    );
    let paths = glob::glob(&pattern)
        .map_err(|e| TaskError::Config(format!("invalid task id {prefix:?}: {e}")))?;
    let mut matched = Vec::new();
    for path in paths.flatten() {
        let Some(task_id) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(TASK_EXT))
        else {
            continue;
        };
        if let Some(mtime) = mtime_secs(&path) {
            matched.push(SelectedTask {
                task_id: task_id.to_string(),
                modified: Some(mtime),
            });
        }
    }
    Ok(matched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskParams;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::time::{Duration, SystemTime};

    fn save(config: &TaskStoreConfig, id: &str, tags: &[&str], age_secs: u64) {
        let record = TaskFile::new(config, id);
        record
            .save(TaskParams {
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..TaskParams::default()
            })
            .unwrap();
        File::options()
            .write(true)
            .open(record.path())
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    fn ids(selected: &[SelectedTask]) -> Vec<&str> {
        selected.iter().map(|t| t.task_id.as_str()).collect()
    }

    #[test]
    fn prefixes_ages_and_tags_intersect() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskStoreConfig::new(dir.path());
        save(&config, "abc1", &["x"], 5 * 86_400);
        save(&config, "abc2", &["y"], 10);
        save(&config, "def3", &["x"], 5 * 86_400);

        let all = select(&config, &TaskSelector::all(), false).unwrap();
        assert_eq!(ids(&all), vec!["abc1", "def3", "abc2"]);

        let by_prefix = select(&config, &TaskSelector::all().with_ids(["abc"]), false).unwrap();
        assert_eq!(ids(&by_prefix), vec!["abc1", "abc2"]);

        let old = TaskSelector::all().with_age(AgeFilter::parse("1d").unwrap());
        assert_eq!(ids(&select(&config, &old, false).unwrap()), vec!["abc1", "def3"]);

        let recent = TaskSelector::all().with_age(AgeFilter::parse("-1h").unwrap());
        assert_eq!(ids(&select(&config, &recent, false).unwrap()), vec!["abc2"]);

        let tagged = TaskSelector::all().with_ids(["abc"]).with_tags(["x"]);
        assert_eq!(ids(&select(&config, &tagged, false).unwrap()), vec!["abc1"]);
    }

    #[test]
    fn unmatched_ids_are_kept_only_on_request() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskStoreConfig::new(dir.path());
        let selector = TaskSelector::all().with_ids(["zzz"]);
        assert!(select(&config, &selector, false).unwrap().is_empty());
        let kept = select(&config, &selector, true).unwrap();
        assert_eq!(
            kept,
            vec![SelectedTask {
                task_id: "zzz".into(),
                modified: None
            }]
        );
    }

    #[test]
    fn glob_metacharacters_in_ids_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskStoreConfig::new(dir.path());
        save(&config, "a1", &[], 0);
        let selector = TaskSelector::all().with_ids(["[a]"]);
        assert!(select(&config, &selector, false).unwrap().is_empty());
    }
}
