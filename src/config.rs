//! Task-storage configuration.
//!
//! [`TaskStoreConfig`] names the storage root and the timing knobs of the
//! liveness probe. Every component receives it explicitly; nothing reads a
//! process-wide default path behind the caller's back.
//!
//! # Example Configuration File
//!
//! ```toml
//! root = "/scratch/alice/.sos"
//! monitor_interval = "5s"
//! max_probe_workers = 20
//! max_probe_retries = 5
//! lock_timeout = "20s"
//! stale_after = "30d"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{LOCK_SUFFIX, MAX_PROBE_WORKERS, STATUS_CACHE_FILE, TASK_EXT};
use crate::error::{Result, TaskError};
use crate::quantity::{expand_time, TimeUnit};

/// Configuration for a task-storage tree.
///
/// # Defaults
///
/// | Setting             | Default      | Description                               |
/// |---------------------|--------------|-------------------------------------------|
/// | `root`              | `~/.sos`     | Parent of the `tasks/` directory          |
/// | `monitor_interval`  | 5 s          | Liveness threshold of the probe           |
/// | `max_probe_workers` | 20           | Worker pool cap for multi-task sweeps     |
/// | `max_probe_retries` | 5            | Re-probes allowed when a record changes   |
/// | `lock_timeout`      | 20 s         | Wait for another process's lock sentinel  |
/// | `stale_after`       | 30 days      | Age at which idle tasks are auto-purged   |
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskwatch::TaskStoreConfig;
///
/// let config = TaskStoreConfig::new("/tmp/wf")
///     .with_monitor_interval(Duration::from_secs(2));
/// assert_eq!(config.tasks_dir(), std::path::Path::new("/tmp/wf/tasks"));
/// assert_eq!(config.monitor_interval, Duration::from_secs(2));
/// assert_eq!(config.max_probe_workers, 20);
/// ```
#[derive(Debug, Clone)]
pub struct TaskStoreConfig {
    /// Storage root. Task files live in `root/tasks`.
    pub root: PathBuf,

    /// A pulse file touched more recently than this is proof of life.
    pub monitor_interval: Duration,

    /// Upper bound on concurrent probes in one sweep.
    pub max_probe_workers: usize,

    /// How often one probe restarts after seeing its record change.
    pub max_probe_retries: u32,

    /// How long to wait for a lock sentinel held by another process.
    pub lock_timeout: Duration,

    /// Non-running tasks older than this are purged by status queries.
    pub stale_after: Duration,
}

impl Default for TaskStoreConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sos");
        Self::new(root)
    }
}

impl TaskStoreConfig {
    /// Creates a configuration rooted at `root` with default timings.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            monitor_interval: Duration::from_secs(5),
            max_probe_workers: MAX_PROBE_WORKERS,
            max_probe_retries: 5,
            lock_timeout: Duration::from_secs(20),
            stale_after: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }

    /// Sets the liveness threshold.
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    /// Sets the probe worker cap (clamped to at least one).
    pub fn with_max_probe_workers(mut self, workers: usize) -> Self {
        self.max_probe_workers = workers.max(1);
        self
    }

    /// Sets the number of probe restarts allowed.
    pub fn with_max_probe_retries(mut self, retries: u32) -> Self {
        self.max_probe_retries = retries;
        self
    }

    /// Sets the lock wait timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the auto-purge age.
    pub fn with_stale_after(mut self, age: Duration) -> Self {
        self.stale_after = age;
        self
    }

    /// Directory holding task records and companion files.
    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// Path of the record for `task_id`.
    pub fn task_file(&self, task_id: &str) -> PathBuf {
        self.companion_file(task_id, TASK_EXT)
    }

    /// Path of the companion file of `task_id` with extension `ext`
    /// (including the leading dot).
    pub fn companion_file(&self, task_id: &str, ext: &str) -> PathBuf {
        self.tasks_dir().join(format!("{task_id}{ext}"))
    }

    /// Path of the shared status cache.
    pub fn status_cache_path(&self) -> PathBuf {
        self.tasks_dir().join(STATUS_CACHE_FILE)
    }

    /// Path of the signature store.
    pub fn signature_store_path(&self) -> PathBuf {
        self.root.join("signatures.json")
    }

    /// Parses a configuration from TOML. Missing keys keep their defaults;
    /// durations accept the same expressions as walltime (`"5s"`, `"00:00:05"`).
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use taskwatch::TaskStoreConfig;
    ///
    /// let config = TaskStoreConfig::from_toml(r#"
    ///     root = "/data/wf"
    ///     monitor_interval = "2s"
    ///     max_probe_workers = 4
    /// "#).unwrap();
    /// assert_eq!(config.monitor_interval, Duration::from_secs(2));
    /// assert_eq!(config.max_probe_workers, 4);
    /// assert_eq!(config.max_probe_retries, 5);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self> {
        let raw: RawConfig =
            toml::from_str(content).map_err(|e| TaskError::Config(e.to_string()))?;
        let mut config = match raw.root {
            Some(root) => Self::new(root),
            None => Self::default(),
        };
        if let Some(text) = raw.monitor_interval {
            config.monitor_interval = parse_duration(&text)?;
        }
        if let Some(workers) = raw.max_probe_workers {
            config = config.with_max_probe_workers(workers);
        }
        if let Some(retries) = raw.max_probe_retries {
            config.max_probe_retries = retries;
        }
        if let Some(text) = raw.lock_timeout {
            config.lock_timeout = parse_duration(&text)?;
        }
        if let Some(text) = raw.stale_after {
            config.stale_after = parse_duration(&text)?;
        }
        Ok(config)
    }

    /// Loads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TaskError::io(path, e))?;
        Self::from_toml(&content)
    }

    /// Applies environment overrides on top of `self`.
    ///
    /// - `TASKWATCH_ROOT` - storage root
    /// - `TASKWATCH_MONITOR_INTERVAL_MS` - liveness threshold in milliseconds
    /// - `TASKWATCH_MAX_PROBE_WORKERS` - worker pool cap
    ///
    /// Unparsable numeric values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(root) = std::env::var("TASKWATCH_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Ok(ms) = std::env::var("TASKWATCH_MONITOR_INTERVAL_MS") {
            match ms.parse::<u64>() {
                Ok(ms) => self.monitor_interval = Duration::from_millis(ms),
                Err(_) => tracing::warn!("ignoring TASKWATCH_MONITOR_INTERVAL_MS={ms}"),
            }
        }
        if let Ok(workers) = std::env::var("TASKWATCH_MAX_PROBE_WORKERS") {
            match workers.parse::<usize>() {
                Ok(n) => self = self.with_max_probe_workers(n),
                Err(_) => tracing::warn!("ignoring TASKWATCH_MAX_PROBE_WORKERS={workers}"),
            }
        }
        self
    }

    /// Lock sentinel guarding `path`.
    pub(crate) fn lock_path_for(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(LOCK_SUFFIX);
        PathBuf::from(name)
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    root: Option<PathBuf>,
    monitor_interval: Option<String>,
    max_probe_workers: Option<usize>,
    max_probe_retries: Option<u32>,
    lock_timeout: Option<String>,
    stale_after: Option<String>,
}

fn parse_duration(text: &str) -> Result<Duration> {
    let seconds = expand_time(text, TimeUnit::Seconds)?;
    if seconds < 0.0 {
        return Err(TaskError::Config(format!("negative duration: {text}")));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|e| TaskError::Config(format!("duration {text} out of range: {e}")))
}
