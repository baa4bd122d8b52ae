//! Shared status cache.
//!
//! The status cache maps task ids to the last [`StatusSnapshot`] any process
//! derived for them, so that a sweep can skip re-probing tasks whose evidence
//! has not moved. It is the only mutable state shared between processes that
//! this crate writes besides the records themselves.
//!
//! # Versioning
//!
//! Backends expose the whole map at once together with a monotonic `u64`
//! version (0 when nothing was ever stored). [`StatusCacheBackend::compare_and_store`]
//! replaces the map only if the version is still the one the caller loaded,
//! so read-modify-write cycles never hold a lock across a probe.
//! [`update_cache`] wraps the reload-and-reapply loop writers need.
//!
//! # Backends
//!
//! - [`file::FileStatusCache`] - JSON file guarded by a lock sentinel
//! - [`memory::InMemoryStatusCache`] - process-local, for tests and embedding

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::types::StatusSnapshot;

pub mod file;
pub mod lock;
pub mod memory;

pub use file::FileStatusCache;
pub use lock::FileLock;
pub use memory::InMemoryStatusCache;

/// Task id to last known snapshot.
pub type StatusCacheMap = BTreeMap<String, StatusSnapshot>;

/// Attempts [`update_cache`] makes before giving up on a contended cache.
pub const MAX_CAS_ATTEMPTS: u32 = 10;

/// The cache contents paired with the version they were read at.
///
/// # Examples
///
/// ```
/// use taskwatch::store::VersionedCache;
///
/// let cache = VersionedCache::default();
/// assert_eq!(cache.version, 0);
/// assert!(cache.entries.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VersionedCache {
    /// Snapshots keyed by task id.
    pub entries: StatusCacheMap,
    /// Version of `entries`; 0 if the cache was never written.
    pub version: u64,
}

/// Errors raised by status-cache backends.
///
/// # Examples
///
/// ```
/// use taskwatch::store::StorageError;
///
/// let err = StorageError::VersionConflict {
///     key: "status_cache".to_string(),
///     expected: 2,
///     actual: 3,
/// };
/// assert!(err.to_string().contains("expected 2"));
/// ```
#[derive(Debug)]
pub enum StorageError {
    /// The stored version moved on since the caller loaded it.
    VersionConflict {
        /// What was being written.
        key: String,
        /// The version the caller expected.
        expected: u64,
        /// The version found in storage.
        actual: u64,
    },

    /// Another process held the lock sentinel for too long.
    LockTimeout {
        /// The sentinel path.
        path: PathBuf,
    },

    /// An I/O or encoding failure inside the backend.
    Backend {
        /// Human-readable description of the error.
        message: String,
        /// The underlying error, if available.
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StorageError {
    pub(crate) fn backend(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Backend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VersionConflict {
                key,
                expected,
                actual,
            } => write!(
                f,
                "version conflict on {key}: expected {expected}, found {actual}"
            ),
            Self::LockTimeout { path } => {
                write!(f, "timed out waiting for lock {}", path.display())
            },
            Self::Backend { message, .. } => write!(f, "backend error: {message}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Backend {
                source: Some(src), ..
            } => Some(src.as_ref()),
            _ => None,
        }
    }
}

/// Whole-map storage with compare-and-store semantics.
///
/// Implementations hold any interprocess lock only for the duration of a
/// single `load` or `compare_and_store` call.
pub trait StatusCacheBackend: Send + Sync {
    /// Reads the current map and its version.
    ///
    /// # Errors
    ///
    /// [`StorageError::LockTimeout`] or [`StorageError::Backend`].
    fn load(&self) -> Result<VersionedCache, StorageError>;

    /// Replaces the map if the stored version still equals
    /// `expected_version`, returning the new version.
    ///
    /// # Errors
    ///
    /// [`StorageError::VersionConflict`] if another writer got there first.
    fn compare_and_store(
        &self,
        expected_version: u64,
        entries: &StatusCacheMap,
    ) -> Result<u64, StorageError>;
}

impl<T: StatusCacheBackend + ?Sized> StatusCacheBackend for std::sync::Arc<T> {
    fn load(&self) -> Result<VersionedCache, StorageError> {
        (**self).load()
    }

    fn compare_and_store(
        &self,
        expected_version: u64,
        entries: &StatusCacheMap,
    ) -> Result<u64, StorageError> {
        (**self).compare_and_store(expected_version, entries)
    }
}

/// Applies `apply` to the freshest cache and stores the result, reloading
/// and re-applying on version conflicts.
///
/// `apply` returns whether it changed anything; nothing is written when it
/// did not. Returns the map as stored (or as loaded, if unchanged).
///
/// # Examples
///
/// ```
/// use taskwatch::store::{update_cache, InMemoryStatusCache, StatusCacheBackend};
/// use taskwatch::{StatusSnapshot, TaskStatus};
///
/// let cache = InMemoryStatusCache::new();
/// update_cache(&cache, |entries| {
///     entries.insert("t1".into(), StatusSnapshot::new(TaskStatus::Running));
///     true
/// })
/// .unwrap();
/// assert_eq!(cache.load().unwrap().version, 1);
/// ```
pub fn update_cache<B, F>(backend: &B, mut apply: F) -> Result<StatusCacheMap, StorageError>
where
    B: StatusCacheBackend + ?Sized,
    F: FnMut(&mut StatusCacheMap) -> bool,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let VersionedCache {
            mut entries,
            version,
        } = backend.load()?;
        if !apply(&mut entries) {
            return Ok(entries);
        }
        match backend.compare_and_store(version, &entries) {
            Ok(_) => return Ok(entries),
            Err(StorageError::VersionConflict { .. }) if attempt < MAX_CAS_ATTEMPTS => {
                tracing::debug!("Status cache changed concurrently, retrying (attempt {attempt})");
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend whose first store always loses a race.
    struct RacyBackend {
        inner: InMemoryStatusCache,
        stores: AtomicU32,
    }

    impl StatusCacheBackend for RacyBackend {
        fn load(&self) -> Result<VersionedCache, StorageError> {
            self.inner.load()
        }

        fn compare_and_store(
            &self,
            expected_version: u64,
            entries: &StatusCacheMap,
        ) -> Result<u64, StorageError> {
            if self.stores.fetch_add(1, Ordering::SeqCst) == 0 {
                let mut other = StatusCacheMap::new();
                other.insert("other".into(), StatusSnapshot::new(TaskStatus::New));
                self.inner.compare_and_store(expected_version, &other)?;
            }
            self.inner.compare_and_store(expected_version, entries)
        }
    }

    #[test]
    fn conflicting_writer_reapplies_on_fresh_data() {
        let backend = RacyBackend {
            inner: InMemoryStatusCache::new(),
            stores: AtomicU32::new(0),
        };
        let stored = update_cache(&backend, |entries| {
            entries.insert("mine".into(), StatusSnapshot::new(TaskStatus::Running));
            true
        })
        .unwrap();

        assert!(stored.contains_key("other"));
        assert!(stored.contains_key("mine"));
        assert_eq!(backend.load().unwrap().version, 2);
    }

    #[test]
    fn unchanged_cache_is_not_written() {
        let backend = InMemoryStatusCache::new();
        update_cache(&backend, |_| false).unwrap();
        assert_eq!(backend.load().unwrap().version, 0);
    }

    #[test]
    fn storage_error_display() {
        let err = StorageError::LockTimeout {
            path: PathBuf::from("/x/status_cache.json_"),
        };
        assert_eq!(
            err.to_string(),
            "timed out waiting for lock /x/status_cache.json_"
        );
    }
}
