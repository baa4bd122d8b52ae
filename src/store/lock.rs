//! Interprocess lock sentinel.
//!
//! A lock on `path` is the file `path` + `_`, created with `create_new` so
//! that exactly one process can hold it. Waiters poll until a timeout.
//! Locks are held only for a single load or store, so a sentinel older than
//! [`ABANDONED_AFTER`] was left behind by a crashed holder and is taken over.
//!
//! Each sentinel records an owner token (pid and a per-process counter). A
//! holder only removes the sentinel while it still carries its own token.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::config::TaskStoreConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Suffix of the guard serializing the takeover of an abandoned sentinel.
const TAKEOVER_SUFFIX: &str = ".takeover";

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(0);

/// Age at which a sentinel is considered abandoned.
pub const ABANDONED_AFTER: Duration = Duration::from_secs(120);

/// Held lock; the sentinel is removed on drop.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use taskwatch::store::FileLock;
///
/// let dir = tempfile::tempdir().unwrap();
/// let guarded = dir.path().join("cache.json");
///
/// let lock = FileLock::acquire(&guarded, Duration::from_secs(1)).unwrap();
/// assert!(lock.path().exists());
/// assert!(FileLock::acquire(&guarded, Duration::from_millis(50)).is_err());
/// drop(lock);
/// assert!(FileLock::acquire(&guarded, Duration::from_millis(50)).is_ok());
/// ```
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
    token: String,
}

impl FileLock {
    /// Acquires the lock guarding `guarded`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// An error of kind [`io::ErrorKind::TimedOut`] if the sentinel stays
    /// held, or any other I/O error creating it.
    pub fn acquire(guarded: &Path, timeout: Duration) -> io::Result<Self> {
        let path = TaskStoreConfig::lock_path_for(guarded);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let token = format!(
            "{}-{}",
            std::process::id(),
            NEXT_TOKEN.fetch_add(1, Ordering::Relaxed)
        );
        let deadline = Instant::now() + timeout;
        loop {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    if let Err(e) = file.write_all(token.as_bytes()) {
                        let _ = fs::remove_file(&path);
                        return Err(e);
                    }
                    return Ok(Self { path, token });
                },
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if is_abandoned(&path) && take_over(&path) {
                        continue;
                    }
                    if Instant::now() >= deadline {
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("lock {} is held by another process", path.display()),
                        ));
                    }
                    thread::sleep(POLL_INTERVAL);
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Path of the sentinel file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        match fs::read_to_string(&self.path) {
            Ok(owner) if owner == self.token => {
                let _ = fs::remove_file(&self.path);
            },
            Ok(owner) => tracing::warn!(
                "Lock {} was taken over by {owner}, leaving it in place",
                self.path.display()
            ),
            Err(_) => {},
        }
    }
}

/// Removes an abandoned sentinel while holding a takeover guard.
///
/// Waiters that saw the same abandoned sentinel serialize on the guard and
/// look again once they hold it, so a sentinel created by whoever went first
/// is never removed. Returns `false` if another waiter holds the guard.
fn take_over(path: &Path) -> bool {
    let mut guard = path.as_os_str().to_owned();
    guard.push(TAKEOVER_SUFFIX);
    let guard = PathBuf::from(guard);
    if OpenOptions::new().write(true).create_new(true).open(&guard).is_err() {
        if is_abandoned(&guard) {
            let _ = fs::remove_file(&guard);
        }
        return false;
    }
    if is_abandoned(path) {
        tracing::warn!("Removing abandoned lock {}", path.display());
        let _ = fs::remove_file(path);
    }
    let _ = fs::remove_file(&guard);
    true
}

fn is_abandoned(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .is_some_and(|age| age > ABANDONED_AFTER)
}
