//! File-backed status cache shared by every process using a task directory.
//!
//! The cache is one JSON document `{"version": n, "entries": {...}}`. Each
//! load or store takes the [`FileLock`] sentinel for its own duration only;
//! stores go through a temporary file and a rename so readers never see a
//! half-written document.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::TaskStoreConfig;
use crate::store::{FileLock, StatusCacheBackend, StatusCacheMap, StorageError, VersionedCache};

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheDocument {
    version: u64,
    #[serde(default)]
    entries: StatusCacheMap,
}

/// Status cache persisted as a JSON file.
///
/// # Examples
///
/// ```
/// use taskwatch::store::{FileStatusCache, StatusCacheBackend, StatusCacheMap};
/// use taskwatch::TaskStoreConfig;
///
/// let root = tempfile::tempdir().unwrap();
/// let cache = FileStatusCache::from_config(&TaskStoreConfig::new(root.path()));
///
/// let loaded = cache.load().unwrap();
/// assert_eq!(loaded.version, 0);
/// let version = cache.compare_and_store(0, &StatusCacheMap::new()).unwrap();
/// assert_eq!(version, 1);
/// assert!(cache.compare_and_store(0, &StatusCacheMap::new()).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct FileStatusCache {
    path: PathBuf,
    lock_timeout: Duration,
}

impl FileStatusCache {
    /// Cache stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: Duration::from_secs(20),
        }
    }

    /// The cache of the task directory described by `config`.
    pub fn from_config(config: &TaskStoreConfig) -> Self {
        Self::new(config.status_cache_path()).with_lock_timeout(config.lock_timeout)
    }

    /// Sets how long to wait for another process's lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Path of the cache document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<FileLock, StorageError> {
        FileLock::acquire(&self.path, self.lock_timeout).map_err(|e| {
            if e.kind() == io::ErrorKind::TimedOut {
                StorageError::LockTimeout {
                    path: TaskStoreConfig::lock_path_for(&self.path),
                }
            } else {
                StorageError::backend("failed to create lock sentinel", e)
            }
        })
    }

    /// Reads the document; must be called with the lock held.
    fn read_document(&self) -> Result<CacheDocument, StorageError> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheDocument::default()),
            Err(e) => {
                return Err(StorageError::backend(
                    format!("failed to read {}", self.path.display()),
                    e,
                ))
            },
        };
        match serde_json::from_slice(&content) {
            Ok(document) => Ok(document),
            Err(e) => {
                tracing::warn!(
                    "Discarding corrupt status cache {}: {e}",
                    self.path.display()
                );
                Ok(CacheDocument::default())
            },
        }
    }

    fn write_document(&self, document: &CacheDocument) -> Result<(), StorageError> {
        let data = serde_json::to_vec(document)
            .map_err(|e| StorageError::backend("failed to serialize status cache", e))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::backend("failed to create cache directory", e))?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, data)
            .and_then(|()| fs::rename(&tmp, &self.path))
            .map_err(|e| {
                StorageError::backend(format!("failed to write {}", self.path.display()), e)
            })
    }
}

impl StatusCacheBackend for FileStatusCache {
    fn load(&self) -> Result<VersionedCache, StorageError> {
        let _lock = self.lock()?;
        let document = self.read_document()?;
        Ok(VersionedCache {
            entries: document.entries,
            version: document.version,
        })
    }

    fn compare_and_store(
        &self,
        expected_version: u64,
        entries: &StatusCacheMap,
    ) -> Result<u64, StorageError> {
        let _lock = self.lock()?;
        let current = self.read_document()?.version;
        if current != expected_version {
            return Err(StorageError::VersionConflict {
                key: self.path.display().to_string(),
                expected: expected_version,
                actual: current,
            });
        }
        let document = CacheDocument {
            version: current + 1,
            entries: entries.clone(),
        };
        self.write_document(&document)?;
        Ok(document.version)
    }
}
