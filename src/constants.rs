//! On-disk layout constants shared by the record codec and the probe.

/// Format version written into every new record header.
pub const FORMAT_VERSION: i32 = 1;

/// Width in bytes of the space-padded tag field in the record header.
pub const TAG_FIELD_WIDTH: usize = 128;

/// Number of timestamp slots in the header (seven transitions plus
/// `last_modified`).
pub const TIMESTAMP_COUNT: usize = 8;

/// Number of variable-length sections that follow the header.
pub const SECTION_COUNT: usize = 6;

/// Total header size: 2 x i32, the tag blob, 8 x f64, 6 x i32.
pub const HEADER_SIZE: usize = 2 * 4 + TAG_FIELD_WIDTH + TIMESTAMP_COUNT * 8 + SECTION_COUNT * 4;

/// Byte offset of the status field inside the header.
pub const STATUS_OFFSET: usize = 4;

/// Byte offset of the tag field inside the header.
pub const TAGS_OFFSET: usize = 8;

/// Byte offset of the first timestamp inside the header.
pub const TIMES_OFFSET: usize = TAGS_OFFSET + TAG_FIELD_WIDTH;

/// Largest section the header's i32 size fields can describe.
pub const MAX_SECTION_SIZE: usize = i32::MAX as usize;

/// Extension of the binary task record.
pub const TASK_EXT: &str = ".task";
/// Extension of the submission script written by the executor.
pub const SCRIPT_EXT: &str = ".sh";
/// Extension of the scheduler job-id marker.
pub const JOB_ID_EXT: &str = ".job_id";
/// Extension of the liveness trace touched by a running executor.
pub const PULSE_EXT: &str = ".pulse";
/// Extension of captured standard output.
pub const STDOUT_EXT: &str = ".out";
/// Extension of captured standard error.
pub const STDERR_EXT: &str = ".err";

/// Companion files removed when a task is found dead.
pub const DEAD_TASK_FILES: [&str; 5] = [SCRIPT_EXT, JOB_ID_EXT, STDOUT_EXT, STDERR_EXT, PULSE_EXT];

/// Companion files removed by `kill_task`; the pulse file is kept and made
/// read-only instead.
pub const KILLED_TASK_FILES: [&str; 4] = [SCRIPT_EXT, JOB_ID_EXT, STDOUT_EXT, STDERR_EXT];

/// File name of the shared status cache inside the task directory.
pub const STATUS_CACHE_FILE: &str = "status_cache.json";

/// Suffix appended to a guarded file's path to form its lock sentinel.
pub const LOCK_SUFFIX: &str = "_";

/// Upper bound on concurrent probes in one sweep.
pub const MAX_PROBE_WORKERS: usize = 20;

/// Fixed memory overhead, in bytes, added to a master task that runs workers.
pub const MASTER_MEM_OVERHEAD: u64 = 100_000_000;
