//! Task records and status monitoring for a file-based workflow engine.
//!
//! Every task a workflow submits leaves a binary record, `{id}.task`, in a
//! shared task directory. External executors run the task and leave
//! companion files next to it: a submission script (`.sh`), a scheduler job
//! id (`.job_id`), a liveness trace touched while running (`.pulse`), and
//! captured output (`.out`, `.err`). Nothing reports back directly, so the
//! status of a task is inferred from these files and their timestamps.
//!
//! # Overview
//!
//! A task moves `new -> pending -> submitted -> running` and ends
//! `completed`, `failed` or `aborted`. Writers stamp each transition in the
//! record header; the liveness probe drives `submitted`, `running` and
//! `aborted` from the companion files and writes what it finds back.
//! Verdicts and their file-timestamp evidence go into a status cache shared
//! by every process using the task directory, so sweeps can skip tasks whose
//! evidence has not moved.
//!
//! # Module Organization
//!
//! - [`domain`] - the record format ([`TaskFile`]) and master tasks
//! - [`monitor`] - the probe, parallel sweeps, kill and purge ([`TaskMonitor`])
//! - [`store`] - status-cache backends with compare-and-store semantics
//! - [`signature`] - target signatures for incremental execution
//! - [`types`] - statuses, parameters and snapshots
//! - [`config`] - [`TaskStoreConfig`]
//! - [`quantity`] - time and size expressions
//! - [`error`] - [`TaskError`]
//!
//! # Examples
//!
//! ```
//! use taskwatch::monitor::check_task;
//! use taskwatch::{ObservedStatus, TaskFile, TaskParams, TaskStatus, TaskStoreConfig};
//!
//! let root = tempfile::tempdir().unwrap();
//! let config = TaskStoreConfig::new(root.path());
//!
//! let record = TaskFile::new(&config, "t4a1");
//! record.save(TaskParams::default()).unwrap();
//!
//! let snapshot = check_task(&config, "t4a1", None).unwrap().unwrap();
//! assert_eq!(snapshot.status, ObservedStatus::Known(TaskStatus::New));
//! ```

pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod monitor;
pub mod quantity;
pub mod signature;
pub mod store;
pub mod types;

#[cfg(feature = "logging")]
pub mod logging;

pub use config::TaskStoreConfig;
pub use domain::{MasterTaskParams, Section, TaskFile, TaskHeader, TaskTiming};
pub use error::{Result, TaskError};
#[cfg(feature = "logging")]
pub use logging::init_logging;
pub use monitor::{TaskMonitor, TaskSelector};
pub use signature::{SignatureStore, TargetSignature};
pub use store::{FileStatusCache, InMemoryStatusCache, StatusCacheBackend};
pub use types::*;
