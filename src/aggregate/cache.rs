//! Bounded cache of file metadata shared across searches

use crate::search::types::FileMetadata;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

pub const DEFAULT_METADATA_CACHE_SIZE: usize = 4096;

/// LRU of `stat` results keyed by path. Clones share the same entries.
///
/// Negative lookups are cached too, so a file that vanished is not
/// stat'ed again for every match.
#[derive(Debug, Clone)]
pub struct MetadataCache {
    entries: Arc<Mutex<LruCache<PathBuf, Option<FileMetadata>>>>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_CACHE_SIZE)
    }
}

impl MetadataCache {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    pub fn lookup(&self, path: &Path) -> Option<FileMetadata> {
        if let Some(hit) = self.lock().get(path) {
            return hit.clone();
        }

        // Stat outside the lock
        let metadata = FileMetadata::from_path(path);
        self.lock().put(path.to_path_buf(), metadata.clone());
        metadata
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Drop every entry, returning how many there were
    pub fn clear(&self) -> usize {
        let mut entries = self.lock();
        let count = entries.len();
        entries.clear();
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<PathBuf, Option<FileMetadata>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
