//! Batching of parsed matches into the result index
//!
//! - [`batch`] - The aggregator and its flush policy
//! - [`cache`] - Metadata cache released under memory pressure
//! - [`memory`] - Resident memory gauges
//!
//! Consumers observe a search through [`SearchEvent`]s and the shared
//! [`SearchProgress`] counters.

pub mod batch;
pub mod cache;
pub mod memory;

pub use batch::{Admission, AggregatorConfig, BatchAggregator, FlushReason};
pub use cache::MetadataCache;
pub use memory::{MemoryGauge, ProcessMemory, SyntheticMemory};

use crate::search::types::{SearchMatch, SearchSummary};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;

/// A match waiting for the next flush
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    pub path: PathBuf,
    pub record: SearchMatch,
}

/// Matches one flush added to a file: `matches()[start..start + count]`
/// of that file's entry in the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchRange {
    pub path: PathBuf,
    pub start: usize,
    pub count: usize,
}

/// Notification for the matches written to the index by one flush.
///
/// Batches reference the index instead of carrying the matches, so events
/// left unread never hold a second copy of the results. Use
/// [`SharedIndex::batch_entries`](crate::index::SharedIndex::batch_entries)
/// to fetch them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchBatch {
    /// 1-based flush counter within the search
    pub sequence: u64,
    pub reason: FlushReason,
    /// One range per file, in the order the files first appeared in the batch
    pub ranges: Vec<BatchRange>,
}

impl MatchBatch {
    /// Number of matches in the batch
    pub fn len(&self) -> usize {
        self.ranges.iter().map(|r| r.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.iter().all(|r| r.count == 0)
    }
}

/// Memory stayed above the ceiling after caches were released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceWarning {
    pub resident_bytes: u64,
    pub ceiling: u64,
    pub released_bytes: usize,
}

impl std::fmt::Display for ResourceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "memory usage {:.1} MB is above the {:.1} MB ceiling",
            self.resident_bytes as f64 / (1024.0 * 1024.0),
            self.ceiling as f64 / (1024.0 * 1024.0)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    Batch(MatchBatch),
    Progress(ProgressSnapshot),
    ResourceWarning(ResourceWarning),
    /// Always the last event of a search
    Finished(SearchSummary),
}

/// Destination for aggregator events
pub trait EventSink {
    fn send(&mut self, event: SearchEvent);
}

impl EventSink for Sender<SearchEvent> {
    fn send(&mut self, event: SearchEvent) {
        // Nobody listening is fine; the index still has everything
        let _ = Sender::send(self, event);
    }
}

impl EventSink for Vec<SearchEvent> {
    fn send(&mut self, event: SearchEvent) {
        self.push(event);
    }
}

/// Counters readable while a search runs
#[derive(Debug, Default)]
pub struct SearchProgress {
    matches: AtomicUsize,
    files_with_matches: AtomicUsize,
    files_scanned: AtomicU64,
    batches: AtomicU64,
    skipped_records: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ProgressSnapshot {
    pub matches: usize,
    pub files_with_matches: usize,
    pub files_scanned: u64,
    pub batches: u64,
    pub skipped_records: usize,
}

impl SearchProgress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            matches: self.matches.load(Ordering::Relaxed),
            files_with_matches: self.files_with_matches.load(Ordering::Relaxed),
            files_scanned: self.files_scanned.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            skipped_records: self.skipped_records.load(Ordering::Relaxed),
        }
    }

    pub fn matches(&self) -> usize {
        self.matches.load(Ordering::Relaxed)
    }

    pub fn files_scanned(&self) -> u64 {
        self.files_scanned.load(Ordering::Relaxed)
    }

    pub(crate) fn set_indexed(&self, matches: usize, files: usize) {
        self.matches.store(matches, Ordering::Relaxed);
        self.files_with_matches.store(files, Ordering::Relaxed);
    }

    pub(crate) fn set_files_scanned(&self, files: u64) {
        self.files_scanned.store(files, Ordering::Relaxed);
    }

    pub(crate) fn add_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_skipped(&self, skipped: usize) {
        self.skipped_records.store(skipped, Ordering::Relaxed);
    }
}
