//! The persisted task record and what goes into it.
//!
//! - [`header`] - fixed-size binary header and section layout
//! - [`codec`] - per-section xz compression
//! - [`record`] - [`TaskFile`], the handle every reader and writer goes through
//! - [`master`] - [`MasterTaskParams`], batches of sibling tasks

pub mod codec;
pub mod header;
pub mod master;
pub mod record;

pub use header::{Section, TaskHeader};
pub use master::MasterTaskParams;
pub use record::{failed_result, list_task_ids, TaskFile, TaskTiming};
