//! Integration tests for sweeps, selection, kill and purge through
//! [`TaskMonitor`] with the file-backed status cache.

use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use pretty_assertions::assert_eq;

use taskwatch::monitor::{check_tasks, AgeFilter, TaskSelector};
use taskwatch::store::{FileStatusCache, StatusCacheBackend};
use taskwatch::{ObservedStatus, TaskFile, TaskMonitor, TaskParams, TaskStatus, TaskStoreConfig};

fn setup() -> (tempfile::TempDir, TaskMonitor) {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskStoreConfig::new(dir.path()).with_max_probe_workers(4);
    (dir, TaskMonitor::new(config))
}

fn save(monitor: &TaskMonitor, id: &str, tags: &[&str]) -> TaskFile {
    let record = monitor.record(id);
    let params = TaskParams {
        tags: tags.iter().map(|t| t.to_string()).collect(),
        ..TaskParams::default()
    };
    assert!(record.save(params).unwrap());
    record
}

fn backdate(path: &Path, age: Duration) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn ids(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// ─── Sweeps ─────────────────────────────────────────────────────────────────

#[test]
fn sweep_persists_to_the_file_cache() {
    let (_dir, monitor) = setup();
    for id in ["a1", "a2", "a3"] {
        save(&monitor, id, &[]);
    }
    monitor.record("a2").set_status(TaskStatus::Completed).unwrap();

    let statuses = monitor.check_tasks(&ids(&["a1", "a2", "a3"]), true);
    assert_eq!(statuses.len(), 3);
    assert_eq!(
        statuses["a2"].status,
        ObservedStatus::Known(TaskStatus::Completed)
    );
    assert!(monitor.config().status_cache_path().is_file());

    // A second process sees the same cache.
    let other = FileStatusCache::from_config(monitor.config());
    let stored = other.load().unwrap();
    assert_eq!(stored.version, 1);
    assert_eq!(stored.entries, statuses);

    // Nothing moved: no write.
    let again = monitor.check_tasks(&ids(&["a1", "a2", "a3"]), true);
    assert_eq!(again, statuses);
    assert_eq!(other.load().unwrap().version, 1);
}

#[test]
fn partial_sweep_leaves_other_entries_alone() {
    let (_dir, monitor) = setup();
    save(&monitor, "b1", &[]);
    save(&monitor, "b2", &[]);
    monitor.check_tasks(&ids(&["b1", "b2"]), false);

    monitor.record("b1").set_status(TaskStatus::Failed).unwrap();
    let statuses = monitor.check_tasks(&ids(&["b1"]), false);
    assert_eq!(statuses.keys().collect::<Vec<_>>(), vec!["b1"]);

    let cached = monitor.cache().load().unwrap().entries;
    assert_eq!(cached["b1"].status, ObservedStatus::Known(TaskStatus::Failed));
    assert_eq!(cached["b2"].status, ObservedStatus::Known(TaskStatus::New));
}

#[test]
fn full_sweep_drops_unlisted_entries() {
    let (_dir, monitor) = setup();
    save(&monitor, "c1", &[]);
    save(&monitor, "c2", &[]);
    monitor.check_tasks(&ids(&["c1", "c2"]), true);

    monitor.record("c1").set_status(TaskStatus::Running).unwrap();
    monitor.check_tasks(&ids(&["c1"]), true);

    let cached = monitor.cache().load().unwrap().entries;
    assert_eq!(cached.keys().collect::<Vec<_>>(), vec!["c1"]);
}

#[test]
fn free_function_sweep_accepts_any_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskStoreConfig::new(dir.path());
    TaskFile::new(&config, "d1").save(TaskParams::default()).unwrap();
    let cache = FileStatusCache::new(dir.path().join("elsewhere.json"));

    let statuses = check_tasks(&config, &cache, &ids(&["d1", "ghost"]), false);
    assert_eq!(statuses["d1"].status, ObservedStatus::Known(TaskStatus::New));
    assert_eq!(statuses["ghost"].status, ObservedStatus::Missing);
    assert_eq!(cache.load().unwrap().entries.len(), 2);
}

#[test]
fn many_tasks_in_parallel() {
    let (_dir, monitor) = setup();
    let all: Vec<String> = (0..40).map(|i| format!("p{i:02}")).collect();
    for id in &all {
        save(&monitor, id, &[]);
    }
    let statuses = monitor.check_tasks(&all, true);
    assert_eq!(statuses.len(), all.len());
    assert!(statuses
        .values()
        .all(|s| s.status == ObservedStatus::Known(TaskStatus::New)));
}

#[test]
fn unreadable_task_does_not_stop_the_sweep() {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskStoreConfig::new(dir.path())
        .with_max_probe_workers(2)
        .with_max_probe_retries(0);
    let monitor = TaskMonitor::new(config);
    save(&monitor, "u1", &[]);
    save(&monitor, "u3", &[]);
    fs::write(monitor.config().task_file("u2"), b"partial").unwrap();

    let statuses = monitor.check_tasks(&ids(&["u1", "u2", "u3"]), true);
    assert_eq!(statuses.keys().collect::<Vec<_>>(), vec!["u1", "u3"]);
    assert!(statuses
        .values()
        .all(|s| s.status == ObservedStatus::Known(TaskStatus::New)));
    assert!(!monitor.cache().load().unwrap().entries.contains_key("u2"));
}

// ─── Selection ──────────────────────────────────────────────────────────────

#[test]
fn select_by_prefix_tag_and_age() {
    let (_dir, monitor) = setup();
    let old = save(&monitor, "e10", &["qc"]);
    save(&monitor, "e11", &["align"]);
    save(&monitor, "f20", &["qc"]);
    backdate(old.path(), Duration::from_secs(3 * 86_400));

    let by_prefix = monitor
        .select_tasks(&TaskSelector::all().with_ids(["e1"]))
        .unwrap();
    assert_eq!(
        by_prefix.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>(),
        vec!["e10", "e11"]
    );

    let tagged = monitor
        .select_tasks(&TaskSelector::all().with_tags(["qc"]))
        .unwrap();
    assert_eq!(
        tagged.iter().map(|t| t.task_id.as_str()).collect::<Vec<_>>(),
        vec!["e10", "f20"]
    );

    let old_only = monitor
        .select_tasks(&TaskSelector::all().with_age(AgeFilter::parse("2d").unwrap()))
        .unwrap();
    assert_eq!(old_only.len(), 1);
    assert_eq!(old_only[0].task_id, "e10");

    let recent = monitor
        .select_tasks(&TaskSelector::all().with_age(AgeFilter::parse("-1").unwrap()))
        .unwrap();
    assert_eq!(recent.len(), 2);
}

#[test]
fn query_reports_and_purges_stale_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskStoreConfig::new(dir.path()).with_stale_after(Duration::from_secs(3600));
    let monitor = TaskMonitor::new(config);
    let stale = save(&monitor, "q1", &[]);
    save(&monitor, "q2", &[]);
    stale.set_status(TaskStatus::Completed).unwrap();
    backdate(stale.path(), Duration::from_secs(7200));

    let report = monitor.query_status(&TaskSelector::all()).unwrap();
    assert_eq!(
        report.iter().map(|e| e.task_id.as_str()).collect::<Vec<_>>(),
        vec!["q1", "q2"]
    );
    assert_eq!(
        report[0].status,
        ObservedStatus::Known(TaskStatus::Completed)
    );
    assert!(!stale.exists());
    assert!(monitor.record("q2").exists());
    assert!(!monitor.cache().load().unwrap().entries.contains_key("q1"));
}

// ─── Kill and purge ─────────────────────────────────────────────────────────

#[test]
fn killed_task_probes_as_aborted() {
    let (_dir, monitor) = setup();
    let record = save(&monitor, "k1", &[]);
    record.set_status(TaskStatus::Running).unwrap();
    let pulse = monitor.config().companion_file("k1", ".pulse");
    fs::write(&pulse, "").unwrap();
    assert_eq!(
        monitor.check_task("k1").unwrap().status,
        ObservedStatus::Known(TaskStatus::Running)
    );

    assert_eq!(monitor.kill_task("k1").unwrap(), TaskStatus::Aborted);
    assert!(fs::metadata(&pulse).unwrap().permissions().readonly());
    assert_eq!(
        monitor.check_task("k1").unwrap().status,
        ObservedStatus::Known(TaskStatus::Aborted)
    );
}

#[test]
fn purge_selected_tasks() {
    let (_dir, monitor) = setup();
    save(&monitor, "g1", &["tmp"]);
    save(&monitor, "g2", &[]);
    fs::write(monitor.config().companion_file("g1", ".out"), "x").unwrap();
    monitor.check_tasks(&ids(&["g1", "g2"]), true);

    let purged = monitor
        .purge_tasks(&TaskSelector::all().with_tags(["tmp"]), false)
        .unwrap();
    assert_eq!(purged, vec!["g1".to_string()]);
    assert!(!monitor.record("g1").exists());
    assert!(!monitor.config().companion_file("g1", ".out").exists());
    assert!(monitor.record("g2").exists());

    let cached = monitor.cache().load().unwrap().entries;
    assert!(!cached.contains_key("g1"));
    assert!(cached.contains_key("g2"));
}

#[test]
fn purge_all_empties_the_task_directory() {
    let (_dir, monitor) = setup();
    save(&monitor, "h1", &[]);
    let tasks_dir = monitor.config().tasks_dir();
    fs::create_dir_all(tasks_dir.join("scratch")).unwrap();
    fs::write(tasks_dir.join("stray.txt"), "").unwrap();

    let purged = monitor
        .purge_tasks(&TaskSelector::all().with_ids(["h1"]), true)
        .unwrap();
    assert_eq!(purged, vec!["h1".to_string()]);
    assert_eq!(fs::read_dir(&tasks_dir).unwrap().count(), 0);
}

#[test]
fn purge_with_no_match_removes_nothing() {
    let (_dir, monitor) = setup();
    save(&monitor, "i1", &[]);
    let purged = monitor
        .purge_tasks(&TaskSelector::all().with_ids(["zzz"]), false)
        .unwrap();
    assert!(purged.is_empty());
    assert!(monitor.record("i1").exists());
}
