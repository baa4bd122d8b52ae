//! In-process status cache.
//!
//! Holds the map and its version behind a `parking_lot::Mutex`. Useful for
//! tests and for embedding the monitor in a single long-lived process.

use parking_lot::Mutex;

use crate::store::{StatusCacheBackend, StatusCacheMap, StorageError, VersionedCache};

/// Status cache that lives in memory.
#[derive(Debug, Default)]
pub struct InMemoryStatusCache {
    state: Mutex<VersionedCache>,
}

impl InMemoryStatusCache {
    /// Creates an empty cache at version 0.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusCacheBackend for InMemoryStatusCache {
    fn load(&self) -> Result<VersionedCache, StorageError> {
        Ok(self.state.lock().clone())
    }

    fn compare_and_store(
        &self,
        expected_version: u64,
        entries: &StatusCacheMap,
    ) -> Result<u64, StorageError> {
        let mut state = self.state.lock();
        if state.version != expected_version {
            return Err(StorageError::VersionConflict {
                key: "status_cache".to_string(),
                expected: expected_version,
                actual: state.version,
            });
        }
        state.entries = entries.clone();
        state.version += 1;
        Ok(state.version)
    }
}
