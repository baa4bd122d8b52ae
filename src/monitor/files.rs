//! Filesystem helpers for the probe and the cleanup operations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, UNIX_EPOCH};

use crate::constants::PULSE_EXT;

/// Delay before the single deferred retry of a failed removal.
pub const DEFERRED_REMOVAL_DELAY: Duration = Duration::from_secs(3);

/// Modification time of `path` in seconds since the epoch, `None` if the
/// file does not exist or cannot be stat'ed.
pub fn mtime_secs(path: &Path) -> Option<f64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let since_epoch = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since_epoch.as_secs_f64())
}

/// Returns `true` if `path` exists and its owner cannot write it.
pub fn is_readonly(path: &Path) -> bool {
    fs::metadata(path).is_ok_and(|m| m.permissions().readonly())
}

/// Revokes write permission on `path` for everyone.
pub fn make_readonly(path: &Path) -> io::Result<()> {
    set_writable(path, false)
}

/// Restores owner write permission on `path`.
pub fn make_writable(path: &Path) -> io::Result<()> {
    set_writable(path, true)
}

#[cfg(unix)]
fn set_writable(path: &Path, writable: bool) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if writable { 0o644 } else { 0o444 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_writable(path: &Path, writable: bool) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(!writable);
    fs::set_permissions(path, permissions)
}

/// Removes the companion files of `task_id` with the given extensions.
///
/// Missing files are skipped. A read-only pulse file is made writable
/// first. A removal that fails is logged and retried once from a detached
/// thread after [`DEFERRED_REMOVAL_DELAY`]; the caller never waits for it.
pub fn remove_task_files(tasks_dir: &Path, task_id: &str, exts: &[&str]) {
    for ext in exts {
        let path = tasks_dir.join(format!("{task_id}{ext}"));
        if !path.is_file() {
            continue;
        }
        if *ext == PULSE_EXT && is_readonly(&path) {
            if let Err(e) = make_writable(&path) {
                tracing::debug!("Failed to make {} writable: {e}", path.display());
            }
        }
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!("Failed to remove {}: {e}", path.display());
            defer_removal(path);
        }
    }
}

/// Removes `path`, retrying once later on failure. Returns whether the first
/// attempt succeeded.
pub fn remove_or_defer(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {e}", path.display());
            defer_removal(path.to_path_buf());
            false
        },
    }
}

fn defer_removal(path: PathBuf) {
    let spawned = thread::Builder::new()
        .name("taskwatch-deferred-remove".into())
        .spawn(move || {
            thread::sleep(DEFERRED_REMOVAL_DELAY);
            if let Err(e) = fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::debug!("Deferred removal of {} failed: {e}", path.display());
                }
            }
        });
    if let Err(e) = spawned {
        tracing::debug!("Could not schedule deferred removal: {e}");
    }
}
