//! Target signatures for incremental execution.
//!
//! A [`SignatureStore`] remembers, per target name, the modification time,
//! size and content hash a target had when a step last produced it, so that
//! the step can be skipped while nothing changed. The store is one JSON
//! document shared between processes and guarded by the same lock sentinel
//! scheme as the status cache.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::TaskStoreConfig;
use crate::error::{Result, TaskError};
use crate::monitor::files::mtime_secs;
use crate::store::FileLock;

/// What a target looked like when its signature was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSignature {
    /// Modification time in seconds since the epoch.
    pub mtime: f64,
    /// Size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 of the content.
    pub hash: String,
}

impl TargetSignature {
    /// Reads and hashes the file at `path`.
    ///
    /// # Examples
    ///
    /// ```
    /// use taskwatch::TargetSignature;
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let path = dir.path().join("out.txt");
    /// std::fs::write(&path, "abc").unwrap();
    ///
    /// let sig = TargetSignature::of_file(&path).unwrap();
    /// assert_eq!(sig.size, 3);
    /// assert_eq!(
    ///     sig.hash,
    ///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    /// );
    /// ```
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path).map_err(|e| TaskError::io(path, e))?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf).map_err(|e| TaskError::io(path, e))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }
        let mtime = mtime_secs(path).unwrap_or(0.0);
        Ok(Self {
            mtime,
            size,
            hash: hex::encode(hasher.finalize()),
        })
    }
}

/// Persistent target name to [`TargetSignature`] map.
///
/// # Examples
///
/// ```
/// use taskwatch::{SignatureStore, TargetSignature, TaskStoreConfig};
///
/// let root = tempfile::tempdir().unwrap();
/// let store = SignatureStore::from_config(&TaskStoreConfig::new(root.path()));
///
/// let sig = TargetSignature { mtime: 1.0, size: 3, hash: "00".into() };
/// store.set("out.txt", sig.clone()).unwrap();
/// assert_eq!(store.get("out.txt").unwrap(), Some(sig));
///
/// store.remove("out.txt").unwrap();
/// assert_eq!(store.get("out.txt").unwrap(), None);
/// ```
#[derive(Debug, Clone)]
pub struct SignatureStore {
    path: PathBuf,
    lock_timeout: Duration,
}

type SignatureMap = BTreeMap<String, TargetSignature>;

impl SignatureStore {
    /// Store persisted at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_secs(20),
        }
    }

    /// The store under the configured root.
    pub fn from_config(config: &TaskStoreConfig) -> Self {
        Self::new(config.signature_store_path()).with_lock_timeout(config.lock_timeout)
    }

    /// Sets how long to wait for another process's lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Signature recorded for `target`.
    pub fn get(&self, target: &str) -> Result<Option<TargetSignature>> {
        let _lock = self.lock()?;
        Ok(self.read()?.remove(target))
    }

    /// Records (or replaces) the signature of `target`.
    pub fn set(&self, target: &str, signature: TargetSignature) -> Result<()> {
        self.modify(|map| {
            map.insert(target.to_string(), signature);
        })
    }

    /// Forgets `target`.
    pub fn remove(&self, target: &str) -> Result<()> {
        self.modify(|map| {
            map.remove(target);
        })
    }

    /// Forgets every target.
    pub fn clear(&self) -> Result<()> {
        self.modify(BTreeMap::clear)
    }

    fn modify(&self, op: impl FnOnce(&mut SignatureMap)) -> Result<()> {
        let _lock = self.lock()?;
        let mut map = self.read()?;
        op(&mut map);
        self.write(&map)
    }

    fn lock(&self) -> Result<FileLock> {
        FileLock::acquire(&self.path, self.lock_timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                TaskError::LockTimeout {
                    path: TaskStoreConfig::lock_path_for(&self.path),
                }
            } else {
                TaskError::io(&self.path, e)
            }
        })
    }

    fn read(&self) -> Result<SignatureMap> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SignatureMap::new()),
            Err(e) => return Err(TaskError::io(&self.path, e)),
        };
        Ok(serde_json::from_slice(&content).unwrap_or_else(|e| {
            tracing::warn!(
                "Discarding corrupt signature store {}: {e}",
                self.path.display()
            );
            SignatureMap::new()
        }))
    }

    fn write(&self, map: &SignatureMap) -> Result<()> {
        let data = serde_json::to_vec_pretty(map).map_err(|e| TaskError::Codec {
            section: "signature",
            message: e.to_string(),
        })?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| TaskError::io(parent, e))?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| TaskError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sig(hash: &str) -> TargetSignature {
        TargetSignature {
            mtime: 10.0,
            size: 1,
            hash: hash.into(),
        }
    }

    #[test]
    fn entries_survive_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.json");
        SignatureStore::new(&path).set("a", sig("1")).unwrap();
        SignatureStore::new(&path).set("b", sig("2")).unwrap();

        let store = SignatureStore::new(&path);
        assert_eq!(store.get("a").unwrap(), Some(sig("1")));
        assert_eq!(store.get("b").unwrap(), Some(sig("2")));

        store.clear().unwrap();
        assert_eq!(store.get("a").unwrap(), None);
    }

    #[test]
    fn set_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let store = SignatureStore::new(dir.path().join("s.json"));
        store.set("a", sig("1")).unwrap();
        store.set("a", sig("2")).unwrap();
        assert_eq!(store.get("a").unwrap(), Some(sig("2")));
    }

    #[test]
    fn hash_changes_with_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "one").unwrap();
        let first = TargetSignature::of_file(&path).unwrap();
        fs::write(&path, "two").unwrap();
        let second = TargetSignature::of_file(&path).unwrap();
        assert_ne!(first.hash, second.hash);
        assert!(TargetSignature::of_file(&dir.path().join("missing")).is_err());
    }
}
