//! Integration tests for task records: full write/read lifecycles, master
//! payloads, and recovery from damaged sections.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value};

use taskwatch::constants::HEADER_SIZE;
use taskwatch::{
    MasterTaskParams, Runtime, Section, TaskEnv, TaskFile, TaskParams, TaskPayload, TaskStatus,
    TaskStoreConfig,
};

fn setup() -> (tempfile::TempDir, TaskStoreConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = TaskStoreConfig::new(dir.path());
    (dir, config)
}

fn map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("not an object: {other}"),
    }
}

fn member(cores: u32) -> TaskParams {
    TaskParams {
        task: "run()".into(),
        env: TaskEnv {
            runtime: Runtime {
                cores: Some(cores),
                walltime: Some("1h".into()),
                ..Runtime::default()
            },
            step_name: "align".into(),
            ..TaskEnv::default()
        },
        tags: vec!["batch".into()],
        ..TaskParams::default()
    }
}

fn assert_layout(record: &TaskFile) {
    let header = record.header().unwrap();
    let len = fs::metadata(record.path()).unwrap().len();
    assert_eq!(len, header.total_len());
    assert_eq!(header.offset_of(Section::Params), HEADER_SIZE as u64);
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[test]
fn execution_lifecycle() {
    let (_dir, config) = setup();
    let record = TaskFile::new(&config, "f3a9");
    let params = TaskParams::new(
        "align",
        "",
        "bwa mem ref.fa r1.fq",
        TaskEnv::default(),
        vec!["s1".into(), "fastq".into()],
    );
    assert!(record.save(params.clone()).unwrap());
    assert!(!record.save(TaskParams::default()).unwrap());
    assert_layout(&record);

    record.set_status(TaskStatus::Submitted).unwrap();
    record.set_status(TaskStatus::Running).unwrap();
    fs::write(config.companion_file("f3a9", ".pulse"), "#task: f3a9\n#2 1.0 20M\n").unwrap();
    fs::write(config.companion_file("f3a9", ".out"), "aligned 100 reads\n").unwrap();
    record.add_outputs().unwrap();
    record
        .add_result(&map(json!({"ret_code": 0, "output": ["out.bam"]})))
        .unwrap();
    record.add_signature(&map(json!({"out.bam": "abc"}))).unwrap();
    record.set_status(TaskStatus::Completed).unwrap();
    assert_layout(&record);

    assert_eq!(record.status().unwrap(), TaskStatus::Completed);
    assert_eq!(record.stdout().unwrap(), "aligned 100 reads\n");
    assert_eq!(record.stderr().unwrap(), "");
    assert!(record.pulse().unwrap().starts_with("#task: f3a9"));
    assert!(record.has_stdout().unwrap());
    assert!(!record.has_stderr().unwrap());
    assert_eq!(record.result().unwrap()["ret_code"], json!(0));
    assert_eq!(record.signature().unwrap()["out.bam"], json!("abc"));

    let timing = record.timing().unwrap();
    assert_eq!(timing.tags, vec!["fastq".to_string(), "s1".to_string()]);
    assert!(timing.started.is_some());
    assert!(timing.duration.unwrap() >= 0.0);
    assert!(timing.created_at().is_some());

    let Some(TaskPayload::Single(stored)) = record.params().unwrap() else {
        panic!("expected single-task params");
    };
    assert_eq!(stored.task, params.task);
    assert_eq!(stored.tags, vec!["fastq".to_string(), "s1".to_string()]);
}

#[test]
fn resubmission_starts_over() {
    let (_dir, config) = setup();
    let record = TaskFile::new(&config, "r1");
    record.save(member(1)).unwrap();
    record.set_status(TaskStatus::Failed).unwrap();
    record.add_result(&map(json!({"ret_code": 2}))).unwrap();

    record.update(member(2)).unwrap();
    assert_eq!(record.status().unwrap(), TaskStatus::Pending);
    assert!(!record.has_result().unwrap());
    assert_eq!(record.header().unwrap().time_of(TaskStatus::Failed), 0.0);
    assert_eq!(
        record.params().unwrap().unwrap().params().env.runtime.cores,
        Some(2)
    );
    assert_layout(&record);
}

#[test]
fn tags_accumulate() {
    let (_dir, config) = setup();
    let record = TaskFile::new(&config, "t1");
    record.save(TaskParams::default()).unwrap();
    record.add_tags(&["b".into(), "a".into()]).unwrap();
    record.add_tags(&["a".into(), "c".into()]).unwrap();
    assert_eq!(record.tags().unwrap(), vec!["a", "b", "c"]);

    record.set_tags(&["z".into()]).unwrap();
    assert_eq!(record.tags().unwrap(), vec!["z"]);
}

// ─── Master payloads ────────────────────────────────────────────────────────

#[test]
fn master_payload_round_trips() {
    let (_dir, config) = setup();
    let mut master = MasterTaskParams::new(2);
    for i in 0..3 {
        master.push(format!("m{i}"), member(2)).unwrap();
    }
    assert!(master.push("m3", member(8)).is_err());
    assert_eq!(master.num_tasks(), 3);

    let record = TaskFile::new(&config, master.id());
    assert!(record.save(master.clone()).unwrap());
    assert_eq!(record.tags().unwrap(), vec!["batch"]);

    let Some(TaskPayload::Master(stored)) = record.params().unwrap() else {
        panic!("expected master params");
    };
    assert_eq!(stored, master);
    assert_eq!(stored.params().env.runtime.cores, Some(5));
    assert_eq!(stored.params().env.runtime.walltime.as_deref(), Some("02:00:00"));
}

// ─── Damaged records ────────────────────────────────────────────────────────

#[test]
fn garbled_result_reads_as_failure() {
    let (_dir, config) = setup();
    let record = TaskFile::new(&config, "g1");
    record.save(TaskParams::default()).unwrap();
    record.add_result(&map(json!({"ret_code": 0}))).unwrap();

    let header = record.header().unwrap();
    let size = header.size_of(Section::Result) as usize;
    let mut file = OpenOptions::new().write(true).open(record.path()).unwrap();
    file.seek(SeekFrom::Start(header.offset_of(Section::Result)))
        .unwrap();
    file.write_all(&vec![0x5a; size]).unwrap();
    drop(file);

    assert_eq!(record.result().unwrap(), map(json!({"ret_code": 1})));
    assert!(record.params().unwrap().is_some());
}

#[test]
fn truncated_record_reads_sections_as_absent() {
    let (_dir, config) = setup();
    let record = TaskFile::new(&config, "g2");
    record.save(TaskParams::default()).unwrap();
    fs::write(config.companion_file("g2", ".out"), "x".repeat(4096)).unwrap();
    record.add_outputs().unwrap();

    let header = record.header().unwrap();
    let file = OpenOptions::new().write(true).open(record.path()).unwrap();
    file.set_len(header.offset_of(Section::Stdout) + 2).unwrap();
    drop(file);

    assert_eq!(record.stdout().unwrap(), "");
    assert_eq!(record.status().unwrap(), TaskStatus::New);
}

#[test]
fn short_file_is_an_invalid_header() {
    let (_dir, config) = setup();
    fs::create_dir_all(config.tasks_dir()).unwrap();
    fs::write(config.task_file("bad"), b"short").unwrap();

    let err = TaskFile::new(&config, "bad").status().unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains("bad.task"));
}
