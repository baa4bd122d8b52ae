//! Task record -- the persisted binary file describing one task.
//!
//! A [`TaskFile`] is a handle (task id plus path), never a cache: every
//! accessor re-opens the file and decodes the header afresh, because
//! executors and other probing processes rewrite records concurrently.
//!
//! # Layout
//!
//! A fixed [`TaskHeader`] followed by six independently compressed sections
//! in [`Section`] order. Every writer that changes a section size rewrites
//! the header, rewrites the sections from the first changed one onwards, and
//! truncates the file to the length the header describes.
//!
//! # Decode failures
//!
//! A section that fails to decompress or parse (for instance because a writer
//! is truncating the file mid-read) is logged with `tracing::warn!` and
//! replaced by an empty value; [`TaskFile::result`] returns
//! `{"ret_code": 1}` instead so that callers see a failed task rather than
//! an empty one.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::config::TaskStoreConfig;
use crate::constants::{HEADER_SIZE, PULSE_EXT, STDERR_EXT, STDOUT_EXT, TASK_EXT};
use crate::domain::codec::{self, DecodeError};
use crate::domain::header::{now_secs, Section, TaskHeader};
use crate::error::{Result, TaskError};
use crate::types::{TaskPayload, TaskStatus};

/// Handle on the record of one task.
///
/// # Examples
///
/// ```
/// use taskwatch::{TaskFile, TaskParams, TaskStatus, TaskStoreConfig};
///
/// let root = tempfile::tempdir().unwrap();
/// let config = TaskStoreConfig::new(root.path());
/// let record = TaskFile::new(&config, "t8f3a");
///
/// let params = TaskParams {
///     name: "t8f3a".into(),
///     task: "echo hi".into(),
///     tags: vec!["demo".into()],
///     ..TaskParams::default()
/// };
/// assert!(record.save(params.clone()).unwrap());
/// assert!(!record.save(params).unwrap()); // never overwrites
///
/// assert_eq!(record.status().unwrap(), TaskStatus::New);
/// assert_eq!(record.tags().unwrap(), vec!["demo".to_string()]);
/// ```
#[derive(Debug, Clone)]
pub struct TaskFile {
    task_id: String,
    path: PathBuf,
    tasks_dir: PathBuf,
}

/// Creation and run times of a task, decoded from its header.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTiming {
    /// Sorted tags.
    pub tags: Vec<String>,
    /// When the record was (re)created, in epoch seconds.
    pub created: f64,
    /// When the task was first observed running, if ever.
    pub started: Option<f64>,
    /// Seconds between `started` and the last header write.
    pub duration: Option<f64>,
}

impl TaskTiming {
    /// `created` as a UTC timestamp.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        to_datetime(self.created)
    }

    /// `started` as a UTC timestamp.
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started.and_then(to_datetime)
    }
}

fn to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt((secs * 1000.0) as i64).single()
}

impl TaskFile {
    /// Handle on the record of `task_id` under the configured task directory.
    /// The file need not exist yet.
    pub fn new(config: &TaskStoreConfig, task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            path: config.task_file(task_id),
            tasks_dir: config.tasks_dir(),
        }
    }

    /// The task id.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Path of the record file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns `true` if the record file exists.
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn companion(&self, ext: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}{ext}", self.task_id))
    }

    // ---- Writers ----

    /// Creates the record in the `New` state.
    ///
    /// Returns `false` without touching anything if the record already
    /// exists: a submitted task is never overwritten by its interpreter.
    /// Tags are moved out of the payload into the header.
    pub fn save(&self, payload: impl Into<TaskPayload>) -> Result<bool> {
        if self.exists() {
            tracing::debug!("Do not override existing task file {}", self.path.display());
            return Ok(false);
        }
        let mut payload = payload.into();
        let now = now_secs();
        let mut header = TaskHeader::new(payload.take_tags(), now);
        let block = codec::encode_json(Section::Params, &payload)?;
        header.sizes[Section::Params.index()] = block.len() as u64;

        fs::create_dir_all(&self.tasks_dir).map_err(|e| TaskError::io(&self.tasks_dir, e))?;
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!("Task file {} created concurrently", self.path.display());
                return Ok(false);
            },
            Err(e) => return Err(TaskError::io(&self.path, e)),
        };
        file.write_all(&header.encode())
            .and_then(|()| file.write_all(&block))
            .map_err(|e| TaskError::io(&self.path, e))?;
        Ok(true)
    }

    /// Replaces the parameters for a resubmission.
    ///
    /// The status becomes `Pending`, every transition timestamp is cleared
    /// (`new_time` becomes now), and all execution evidence (pulse, output,
    /// result, signature) is discarded. Tags carried by `payload` replace the
    /// header tags; an untagged payload keeps the existing ones.
    pub fn update(&self, payload: impl Into<TaskPayload>) -> Result<()> {
        let mut payload = payload.into();
        let tags = payload.take_tags();
        let block = codec::encode_json(Section::Params, &payload)?;
        self.with_record(|file, header| {
            header.restart(TaskStatus::Pending, now_secs());
            if !tags.is_empty() {
                header.set_tags(tags);
            }
            header.sizes[Section::Params.index()] = block.len() as u64;
            write_header(file, header)?;
            file.write_all(&block)?;
            file.set_len(header.total_len())
        })
    }

    /// Returns the record to the `New` state, keeping its parameters and
    /// dropping everything after them.
    pub fn reset(&self) -> Result<()> {
        self.with_record(|file, header| {
            reset_in_place(file, header)?;
            Ok(())
        })
    }

    /// Captures the executor's pulse, stdout and stderr files into the record.
    ///
    /// A result already attached is invalidated: the record is reset first.
    /// Missing companion files produce empty sections.
    pub fn add_outputs(&self) -> Result<()> {
        let pulse = self.compressed_companion(Section::Pulse, PULSE_EXT)?;
        let stdout = self.compressed_companion(Section::Stdout, STDOUT_EXT)?;
        let stderr = self.compressed_companion(Section::Stderr, STDERR_EXT)?;
        self.with_record(|file, header| {
            if header.size_of(Section::Result) != 0 {
                reset_in_place(file, header)?;
            }
            replace_sections(
                file,
                header,
                vec![
                    (Section::Pulse, pulse),
                    (Section::Stdout, stdout),
                    (Section::Stderr, stderr),
                ],
            )
        })
    }

    /// Attaches (or replaces) the result. Earlier sections are untouched; an
    /// existing signature is carried over.
    pub fn add_result(&self, result: &Map<String, Value>) -> Result<()> {
        let block = codec::encode_json(Section::Result, result)?;
        self.with_record(|file, header| {
            replace_sections(file, header, vec![(Section::Result, block)])
        })
    }

    /// Attaches (or replaces) the signature section.
    pub fn add_signature(&self, signature: &Map<String, Value>) -> Result<()> {
        let block = codec::encode_json(Section::Signature, signature)?;
        self.with_record(|file, header| {
            replace_sections(file, header, vec![(Section::Signature, block)])
        })
    }

    /// Sets the status, stamping its transition time and `last_modified`.
    ///
    /// Any status may be assigned at any time; other timestamps are kept.
    pub fn set_status(&self, status: TaskStatus) -> Result<()> {
        self.with_record(|file, header| {
            header.mark(status, now_secs());
            write_header(file, header)
        })
    }

    /// Sets the status from its lower-case name.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidStatus`] if `name` is not a known status; the
    /// record is left untouched.
    pub fn set_status_named(&self, name: &str) -> Result<()> {
        self.set_status(name.parse()?)
    }

    /// Replaces the tags (sorted, space-joined, padded to the field width).
    pub fn set_tags(&self, tags: &[String]) -> Result<()> {
        self.with_record(|file, header| {
            header.set_tags(tags.to_vec());
            header.touch(now_secs());
            write_header(file, header)
        })
    }

    /// Merges `tags` into the existing tags.
    pub fn add_tags(&self, tags: &[String]) -> Result<()> {
        self.with_record(|file, header| {
            let mut merged = header.tags.clone();
            merged.extend(tags.iter().cloned());
            header.set_tags(merged);
            header.touch(now_secs());
            write_header(file, header)
        })
    }

    // ---- Readers ----

    /// Decodes the header.
    pub fn header(&self) -> Result<TaskHeader> {
        let mut file = self.open(false)?;
        self.read_header(&mut file)
    }

    /// Current status.
    pub fn status(&self) -> Result<TaskStatus> {
        Ok(self.header()?.status)
    }

    /// Current tags.
    pub fn tags(&self) -> Result<Vec<String>> {
        Ok(self.header()?.tags)
    }

    /// Header timestamps summarised for listings.
    pub fn timing(&self) -> Result<TaskTiming> {
        let header = self.header()?;
        let running = header.time_of(TaskStatus::Running);
        let (started, duration) = if running != 0.0 {
            (Some(running), Some(header.last_modified() - running))
        } else {
            (None, None)
        };
        Ok(TaskTiming {
            tags: header.tags.clone(),
            created: header.time_of(TaskStatus::New),
            started,
            duration,
        })
    }

    /// Returns `true` if a result section is attached.
    pub fn has_result(&self) -> Result<bool> {
        Ok(self.header()?.size_of(Section::Result) > 0)
    }

    /// Returns `true` if a stdout section is attached.
    pub fn has_stdout(&self) -> Result<bool> {
        Ok(self.header()?.size_of(Section::Stdout) > 0)
    }

    /// Returns `true` if a stderr section is attached.
    pub fn has_stderr(&self) -> Result<bool> {
        Ok(self.header()?.size_of(Section::Stderr) > 0)
    }

    /// Returns `true` if a signature section is attached.
    pub fn has_signature(&self) -> Result<bool> {
        Ok(self.header()?.size_of(Section::Signature) > 0)
    }

    /// The task parameters, with the header tags re-attached. `None` if the
    /// section is absent or unreadable.
    pub fn params(&self) -> Result<Option<TaskPayload>> {
        let (header, block) = self.read_section(Section::Params)?;
        let Some(block) = block else {
            return Ok(None);
        };
        match codec::decode_json::<TaskPayload>(&block) {
            Ok(mut payload) => {
                payload.set_tags(header.tags);
                Ok(Some(payload))
            },
            Err(e) => {
                self.warn_decode(Section::Params, &e);
                Ok(None)
            },
        }
    }

    /// Captured liveness trace.
    pub fn pulse(&self) -> Result<String> {
        self.text_section(Section::Pulse)
    }

    /// Captured standard output.
    pub fn stdout(&self) -> Result<String> {
        self.text_section(Section::Stdout)
    }

    /// Captured standard error.
    pub fn stderr(&self) -> Result<String> {
        self.text_section(Section::Stderr)
    }

    /// The result map; empty if none is attached, `{"ret_code": 1}` if it
    /// cannot be decoded.
    pub fn result(&self) -> Result<Map<String, Value>> {
        let (_, block) = self.read_section(Section::Result)?;
        let Some(block) = block else {
            return Ok(Map::new());
        };
        Ok(codec::decode_json(&block).unwrap_or_else(|e| {
            self.warn_decode(Section::Result, &e);
            failed_result()
        }))
    }

    /// The signature map; empty if none is attached or it cannot be decoded.
    pub fn signature(&self) -> Result<Map<String, Value>> {
        let (_, block) = self.read_section(Section::Signature)?;
        let Some(block) = block else {
            return Ok(Map::new());
        };
        Ok(codec::decode_json(&block).unwrap_or_else(|e| {
            self.warn_decode(Section::Signature, &e);
            Map::new()
        }))
    }

    // ---- Internals ----

    fn open(&self, write: bool) -> Result<File> {
        OpenOptions::new()
            .read(true)
            .write(write)
            .open(&self.path)
            .map_err(|e| TaskError::io(&self.path, e))
    }

    fn read_header(&self, file: &mut File) -> Result<TaskHeader> {
        let mut buf = [0u8; HEADER_SIZE];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut buf))
            .map_err(|e| match e.kind() {
                io::ErrorKind::UnexpectedEof => TaskError::InvalidHeader {
                    path: self.path.clone(),
                    reason: "file shorter than header".to_string(),
                },
                _ => TaskError::io(&self.path, e),
            })?;
        TaskHeader::decode(&buf).map_err(|e| TaskError::InvalidHeader {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Opens the record for writing, decodes its header, and runs `op`.
    fn with_record<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut File, &mut TaskHeader) -> io::Result<()>,
    {
        let mut file = self.open(true)?;
        let mut header = self.read_header(&mut file)?;
        op(&mut file, &mut header).map_err(|e| TaskError::io(&self.path, e))
    }

    /// Reads the raw bytes of `section`. A section cut short by a concurrent
    /// writer is reported as absent.
    fn read_section(&self, section: Section) -> Result<(TaskHeader, Option<Vec<u8>>)> {
        let mut file = self.open(false)?;
        let header = self.read_header(&mut file)?;
        let size = header.size_of(section);
        if size == 0 {
            return Ok((header, None));
        }
        let mut block = vec![0u8; size as usize];
        let read = file
            .seek(SeekFrom::Start(header.offset_of(section)))
            .and_then(|_| file.read_exact(&mut block));
        match read {
            Ok(()) => Ok((header, Some(block))),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!(
                    "Failed to read {} of task {}: record is shorter than its header claims",
                    section.name(),
                    self.task_id
                );
                Ok((header, None))
            },
            Err(e) => Err(TaskError::io(&self.path, e)),
        }
    }

    fn text_section(&self, section: Section) -> Result<String> {
        let (_, block) = self.read_section(section)?;
        let Some(block) = block else {
            return Ok(String::new());
        };
        Ok(codec::decode_text(&block).unwrap_or_else(|e| {
            self.warn_decode(section, &e);
            String::new()
        }))
    }

    fn warn_decode(&self, section: Section, err: &DecodeError) {
        tracing::warn!(
            "Failed to decode {} of task {}: {err}",
            section.name(),
            self.task_id
        );
    }

    fn compressed_companion(&self, section: Section, ext: &str) -> Result<Vec<u8>> {
        let path = self.companion(ext);
        match fs::read(&path) {
            Ok(raw) => codec::compress(section, &raw),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(TaskError::io(&path, e)),
        }
    }
}

/// The result reported when a stored result cannot be decoded.
pub fn failed_result() -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("ret_code".to_string(), json!(1));
    map
}

fn write_header(file: &mut File, header: &TaskHeader) -> io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&header.encode())
}

fn reset_in_place(file: &mut File, header: &mut TaskHeader) -> io::Result<()> {
    header.restart(TaskStatus::New, now_secs());
    write_header(file, header)?;
    file.set_len(header.total_len())
}

/// Replaces the given sections, re-writing every section from the first
/// replaced one to the end and truncating to the new length.
fn replace_sections(
    file: &mut File,
    header: &mut TaskHeader,
    mut replacements: Vec<(Section, Vec<u8>)>,
) -> io::Result<()> {
    let Some(first) = replacements.iter().map(|(s, _)| s.index()).min() else {
        return Ok(());
    };

    let mut blocks: Vec<Vec<u8>> = Vec::with_capacity(Section::ALL.len() - first);
    for section in &Section::ALL[first..] {
        if let Some(pos) = replacements.iter().position(|(s, _)| s == section) {
            blocks.push(replacements.swap_remove(pos).1);
            continue;
        }
        let size = header.size_of(*section) as usize;
        let mut block = vec![0u8; size];
        if size > 0 {
            file.seek(SeekFrom::Start(header.offset_of(*section)))?;
            file.read_exact(&mut block)?;
        }
        blocks.push(block);
    }

    for (section, block) in Section::ALL[first..].iter().zip(&blocks) {
        header.sizes[section.index()] = block.len() as u64;
    }
    header.touch(now_secs());
    write_header(file, header)?;
    file.seek(SeekFrom::Start(header.offset_of(Section::ALL[first])))?;
    for block in &blocks {
        file.write_all(block)?;
    }
    file.set_len(header.total_len())
}

/// Task ids of every record directly inside `tasks_dir`, with their record
/// modification times.
pub fn list_task_ids(tasks_dir: &Path) -> Result<Vec<(String, f64)>> {
    let entries = match fs::read_dir(tasks_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TaskError::io(tasks_dir, e)),
    };
    let mut ids = Vec::new();
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(id) = name.to_str().and_then(|n| n.strip_suffix(TASK_EXT)) else {
            continue;
        };
        if let Some(mtime) = crate::monitor::files::mtime_secs(&entry.path()) {
            ids.push((id.to_string(), mtime));
        }
    }
    Ok(ids)
}
