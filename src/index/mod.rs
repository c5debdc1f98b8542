//! Per-file organization of search results
//!
//! Files are kept in first-seen order and matches within a file in arrival
//! order. Nothing is ever re-sorted; counters are maintained on insert.

pub mod export;

use crate::aggregate::{BatchEntry, MatchBatch};
use crate::search::types::{FileMetadata, FileResult, SearchMatch};
use ahash::AHashMap;
use lru::LruCache;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use export::{parse_csv, MatchRow};

/// Matches of one search, grouped by file
#[derive(Debug)]
pub struct ResultIndex {
    files: Vec<FileResult>,
    positions: AHashMap<PathBuf, usize>,
    total_matches: usize,
    context_bytes: usize,
    /// File positions ordered by last update, most recent first
    recency: LruCache<usize, ()>,
}

impl Default for ResultIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultIndex {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            positions: AHashMap::new(),
            total_matches: 0,
            context_bytes: 0,
            recency: LruCache::unbounded(),
        }
    }

    /// Append a match to its file, creating the file entry on first sight.
    /// Returns true when the file was new.
    pub fn add(&mut self, path: &Path, m: SearchMatch) -> bool {
        self.context_bytes += m.context_bytes();
        self.total_matches += 1;

        if let Some(&pos) = self.positions.get(path) {
            self.files[pos].push(m);
            self.recency.put(pos, ());
            return false;
        }

        let pos = self.files.len();
        let mut file = FileResult::new(path);
        file.push(m);
        self.files.push(file);
        self.positions.insert(path.to_path_buf(), pos);
        self.recency.put(pos, ());
        true
    }

    pub fn get(&self, path: &Path) -> Option<&FileResult> {
        self.positions.get(path).map(|&pos| &self.files[pos])
    }

    /// Every file with matches, in first-seen order
    pub fn all(&self) -> &[FileResult] {
        &self.files
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.positions.contains_key(path)
    }

    pub fn total_matches(&self) -> usize {
        self.total_matches
    }

    pub fn files_with_matches(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Bytes currently held by context lines
    pub fn context_bytes(&self) -> usize {
        self.context_bytes
    }

    /// Returns false when the file has no entry
    pub fn set_metadata(&mut self, path: &Path, metadata: Option<FileMetadata>) -> bool {
        match self.positions.get(path) {
            Some(&pos) => {
                self.files[pos].set_metadata(metadata);
                true
            }
            None => false,
        }
    }

    /// Matches referenced by a batch, in batch order. Ranges that do not
    /// resolve (a batch from another index) are skipped.
    pub fn batch_entries(&self, batch: &MatchBatch) -> Vec<BatchEntry> {
        batch
            .ranges
            .iter()
            .filter_map(|range| {
                let file = self.get(&range.path)?;
                let matches = file.matches().get(range.start..range.start + range.count)?;
                Some(matches.iter().map(move |m| BatchEntry {
                    path: range.path.clone(),
                    record: m.clone(),
                }))
            })
            .flatten()
            .collect()
    }

    /// Drop context lines from the least recently updated files until at
    /// least `target` bytes were released or no context is left. Matches
    /// themselves are never removed.
    pub fn compact_least_recent(&mut self, target: usize) -> usize {
        let oldest_first: Vec<usize> = self.recency.iter().rev().map(|(&pos, _)| pos).collect();

        let mut freed = 0;
        for pos in oldest_first {
            if freed >= target || self.context_bytes == 0 {
                break;
            }
            let released = self.files[pos].drop_context();
            freed += released;
            self.context_bytes -= released.min(self.context_bytes);
        }
        freed
    }
}

/// An index shared between the aggregating worker and readers.
/// Lock poisoning is ignored: the index is append-only and stays consistent.
#[derive(Debug, Clone, Default)]
pub struct SharedIndex(Arc<RwLock<ResultIndex>>);

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, ResultIndex> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, ResultIndex> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn total_matches(&self) -> usize {
        self.read().total_matches()
    }

    pub fn files_with_matches(&self) -> usize {
        self.read().files_with_matches()
    }

    /// Clone of one file's results
    pub fn get(&self, path: &Path) -> Option<FileResult> {
        self.read().get(path).cloned()
    }

    /// Clones of the matches a batch refers to
    pub fn batch_entries(&self, batch: &MatchBatch) -> Vec<BatchEntry> {
        self.read().batch_entries(batch)
    }

    /// Clone of every file's results
    pub fn snapshot(&self) -> Vec<FileResult> {
        self.read().all().to_vec()
    }
}
