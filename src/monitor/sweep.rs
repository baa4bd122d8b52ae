//! Multi-task sweeps: probe many tasks in parallel and merge the verdicts
//! into the shared status cache.

use rayon::prelude::*;

use crate::config::TaskStoreConfig;
use crate::monitor::probe::check_task;
use crate::store::{update_cache, StatusCacheBackend, StatusCacheMap};
use crate::types::StatusSnapshot;

/// Probes `task_ids` and returns their statuses.
///
/// Probes run on a dedicated pool of at most `max_probe_workers` threads
/// (fewer for short lists), each seeded with the cached snapshot of its task
/// as hint. A probe that fails is logged and counts as "unchanged".
///
/// With `full_sweep`, `task_ids` is taken to be every task there is: the
/// cache is rebuilt from exactly these ids, keeping cached snapshots for
/// unchanged tasks and dropping entries of tasks that no longer exist.
/// Otherwise only changed entries are written and everything else in the
/// cache is left alone. Nothing is written when no probe reported a change.
///
/// The returned map covers the queried tasks. A task that was never cached
/// and whose probe failed is absent from it.
///
/// Cache failures are logged; the sweep still returns what it observed.
pub fn check_tasks<B>(
    config: &TaskStoreConfig,
    cache: &B,
    task_ids: &[String],
    full_sweep: bool,
) -> StatusCacheMap
where
    B: StatusCacheBackend + ?Sized,
{
    if task_ids.is_empty() {
        return StatusCacheMap::new();
    }

    let cached = cache.load().map_or_else(
        |e| {
            tracing::warn!("Failed to load status cache: {e}");
            StatusCacheMap::new()
        },
        |loaded| loaded.entries,
    );

    let verdicts = probe_all(config, &cached, task_ids);
    let changed = verdicts.iter().filter(|(_, v)| v.is_some()).count();
    tracing::debug!(
        "Checked {} tasks, {changed} changed{}",
        task_ids.len(),
        if full_sweep { " (full sweep)" } else { "" }
    );

    let merged = if changed == 0 {
        None
    } else {
        match update_cache(cache, |entries| merge(entries, &verdicts, full_sweep)) {
            Ok(stored) => Some(stored),
            Err(e) => {
                tracing::warn!("Failed to save status cache: {e}");
                None
            },
        }
    };
    let merged = merged.unwrap_or_else(|| {
        let mut entries = cached;
        merge(&mut entries, &verdicts, full_sweep);
        entries
    });

    task_ids
        .iter()
        .filter_map(|id| merged.get(id).map(|snap| (id.clone(), snap.clone())))
        .collect()
}

fn probe_all(
    config: &TaskStoreConfig,
    cached: &StatusCacheMap,
    task_ids: &[String],
) -> Vec<(String, Option<StatusSnapshot>)> {
    let probe = |id: &String| {
        let verdict = match check_task(config, id, cached.get(id)) {
            Ok(verdict) => verdict,
            Err(e) => {
                tracing::warn!("Failed to check status of task {id}: {e}");
                None
            },
        };
        (id.clone(), verdict)
    };

    parallel_map(config.max_probe_workers, task_ids, probe)
}

/// Maps `f` over `items` on a dedicated pool of at most `max_workers`
/// threads, preserving order. Falls back to the calling thread if the pool
/// cannot be started.
pub(crate) fn parallel_map<T, R, F>(max_workers: usize, items: &[T], f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync + Send,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = max_workers.clamp(1, items.len());
    match rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("taskwatch-probe-{i}"))
        .build()
    {
        Ok(pool) => pool.install(|| items.par_iter().map(&f).collect()),
        Err(e) => {
            tracing::warn!("Failed to start worker pool, running sequentially: {e}");
            items.iter().map(f).collect()
        },
    }
}

/// Folds probe verdicts into `entries`; returns whether anything changed.
fn merge(
    entries: &mut StatusCacheMap,
    verdicts: &[(String, Option<StatusSnapshot>)],
    full_sweep: bool,
) -> bool {
    if !verdicts.iter().any(|(_, v)| v.is_some()) {
        return false;
    }
    if full_sweep {
        let rebuilt: StatusCacheMap = verdicts
            .iter()
            .filter_map(|(id, verdict)| {
                verdict
                    .clone()
                    .or_else(|| entries.get(id).cloned())
                    .map(|snap| (id.clone(), snap))
            })
            .collect();
        *entries = rebuilt;
    } else {
        for (id, verdict) in verdicts {
            if let Some(snap) = verdict {
                entries.insert(id.clone(), snap.clone());
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ObservedStatus, TaskStatus};
    use pretty_assertions::assert_eq;

    fn snap(status: TaskStatus) -> StatusSnapshot {
        StatusSnapshot::new(status)
    }

    #[test]
    fn full_sweep_rebuilds_from_queried_ids() {
        let mut entries = StatusCacheMap::new();
        entries.insert("keep".into(), snap(TaskStatus::Completed));
        entries.insert("gone".into(), snap(TaskStatus::Failed));
        let verdicts = vec![
            ("keep".to_string(), None),
            ("new".to_string(), Some(snap(TaskStatus::Running))),
        ];
        assert!(merge(&mut entries, &verdicts, true));
        assert_eq!(
            entries.keys().cloned().collect::<Vec<_>>(),
            vec!["keep".to_string(), "new".to_string()]
        );
        assert_eq!(
            entries["keep"].status,
            ObservedStatus::Known(TaskStatus::Completed)
        );
    }

    #[test]
    fn partial_sweep_only_touches_changed() {
        let mut entries = StatusCacheMap::new();
        entries.insert("other".into(), snap(TaskStatus::Completed));
        let verdicts = vec![("t1".to_string(), Some(snap(TaskStatus::Aborted)))];
        assert!(merge(&mut entries, &verdicts, false));
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn no_verdicts_no_change() {
        let mut entries = StatusCacheMap::new();
        entries.insert("a".into(), snap(TaskStatus::New));
        let verdicts = vec![("a".to_string(), None)];
        assert!(!merge(&mut entries, &verdicts, true));
        assert_eq!(entries.len(), 1);
    }
}
