//! Hybrid size/time batching with a memory ceiling
//!
//! A flush happens when `batch_size` matches are pending or when
//! `flush_interval` has passed since the previous flush. Size is checked
//! first, so a match that trips both thresholds causes one flush. Every
//! flush is preceded by a memory reading; above the ceiling the metadata
//! cache is cleared and context lines are dropped from the least recently
//! updated files, unless the gauge only reports a peak. Pending matches are
//! never dropped for memory.

use super::cache::MetadataCache;
use super::memory::{DEFAULT_MEMORY_CEILING, MemoryGauge, ProcessMemory};
use super::{
    BatchEntry, BatchRange, EventSink, MatchBatch, ResourceWarning, SearchEvent, SearchProgress,
};
use crate::index::SharedIndex;
use crate::parse::ToolStats;
use crate::search::process::CancelToken;
use crate::search::types::{
    DEFAULT_MAX_RESULTS, FileResult, SearchMatch, SearchStatus, SearchSummary,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_BATCH_SIZE: usize = 20;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub memory_ceiling: u64,
    pub max_results: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            memory_ceiling: DEFAULT_MEMORY_CEILING,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// What triggered a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushReason {
    Size,
    Interval,
    /// End of the search
    Final,
}

/// Result of offering a match to the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accepted,
    /// `max_results` matches were already accepted; the match was dropped
    LimitReached,
    /// The search was cancelled; the match was dropped
    Cancelled,
}

/// Buffers matches for one search and writes them to the index.
/// Only the aggregator writes to its index.
pub struct BatchAggregator<S: EventSink> {
    config: AggregatorConfig,
    index: SharedIndex,
    cache: MetadataCache,
    gauge: Arc<dyn MemoryGauge>,
    sink: S,
    cancel: CancelToken,
    progress: Arc<SearchProgress>,
    pending: Vec<BatchEntry>,
    last_flush: Instant,
    started: Instant,
    sequence: u64,
    accepted: usize,
    files_finished: u64,
    tool_stats: Option<ToolStats>,
    in_breach: bool,
    summary: SearchSummary,
}

impl<S: EventSink> BatchAggregator<S> {
    pub fn new(
        pattern: impl Into<String>,
        config: AggregatorConfig,
        index: SharedIndex,
        cache: MetadataCache,
        sink: S,
        cancel: CancelToken,
    ) -> Self {
        let mut summary = SearchSummary::new(pattern);
        summary.status = SearchStatus::Running;
        let now = Instant::now();
        Self {
            config: AggregatorConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            index,
            cache,
            gauge: Arc::new(ProcessMemory),
            sink,
            cancel,
            progress: Arc::new(SearchProgress::default()),
            pending: Vec::with_capacity(config.batch_size.max(1)),
            last_flush: now,
            started: now,
            sequence: 0,
            accepted: 0,
            files_finished: 0,
            tool_stats: None,
            in_breach: false,
            summary,
        }
    }

    pub fn with_gauge(mut self, gauge: Arc<dyn MemoryGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn with_progress(mut self, progress: Arc<SearchProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> Arc<SearchProgress> {
        Arc::clone(&self.progress)
    }

    /// Summary as of the last flush
    pub fn summary(&self) -> &SearchSummary {
        &self.summary
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn flushes(&self) -> u64 {
        self.sequence
    }

    pub fn process(&mut self, path: PathBuf, record: SearchMatch) -> Admission {
        if self.cancel.is_cancelled() {
            return Admission::Cancelled;
        }
        if self.accepted >= self.config.max_results {
            if !self.summary.truncated {
                debug!(max_results = self.config.max_results, "result limit reached");
            }
            self.summary.truncated = true;
            return Admission::LimitReached;
        }

        self.pending.push(BatchEntry { path, record });
        self.accepted += 1;

        if self.pending.len() >= self.config.batch_size {
            self.flush(FlushReason::Size);
        } else if self.last_flush.elapsed() >= self.config.flush_interval {
            self.flush(FlushReason::Interval);
        }
        Admission::Accepted
    }

    /// Flush pending matches whose interval has elapsed.
    /// Returns true if a flush happened.
    pub fn tick(&mut self) -> bool {
        if self.pending.is_empty() || self.last_flush.elapsed() < self.config.flush_interval {
            return false;
        }
        self.flush(FlushReason::Interval)
    }

    /// Time until the pending matches are due, `None` when nothing is pending
    pub fn time_until_flush(&self) -> Option<Duration> {
        if self.pending.is_empty() {
            return None;
        }
        Some(
            self.config
                .flush_interval
                .saturating_sub(self.last_flush.elapsed()),
        )
    }

    /// Write pending matches to the index and emit them as a batch.
    /// Returns false if there was nothing to flush or the search was cancelled.
    pub fn flush(&mut self, reason: FlushReason) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.check_memory();

        let entries = std::mem::take(&mut self.pending);
        let mut new_files = Vec::new();
        let mut ranges: Vec<BatchRange> = Vec::new();
        let (total, files) = {
            let mut index = self.index.write();
            // Checked under the write lock so no match lands after a cancel
            if self.cancel.is_cancelled() {
                debug!(discarded = entries.len(), "dropping pending matches after cancel");
                return false;
            }
            for BatchEntry { path, record } in entries {
                // A file's additions within one flush are contiguous in the index
                match ranges.iter_mut().find(|r| r.path == path) {
                    Some(range) => range.count += 1,
                    None => ranges.push(BatchRange {
                        start: index.get(&path).map_or(0, FileResult::match_count),
                        path: path.clone(),
                        count: 1,
                    }),
                }
                if index.add(&path, record) {
                    new_files.push(path);
                }
            }
            (index.total_matches(), index.files_with_matches())
        };
        self.record_metadata(&new_files);

        self.sequence += 1;
        self.last_flush = Instant::now();
        self.summary.total_matches = total;
        self.summary.files_with_matches = files;
        self.progress.set_indexed(total, files);
        self.progress.add_batch();

        self.sink.send(SearchEvent::Batch(MatchBatch {
            sequence: self.sequence,
            reason,
            ranges,
        }));
        self.sink.send(SearchEvent::Progress(self.progress.snapshot()));
        true
    }

    fn record_metadata(&self, paths: &[PathBuf]) {
        if paths.is_empty() {
            return;
        }
        let found: Vec<_> = paths.iter().map(|p| (p, self.cache.lookup(p))).collect();
        let mut index = self.index.write();
        for (path, metadata) in found {
            index.set_metadata(path, metadata);
        }
    }

    fn check_memory(&mut self) {
        let ceiling = self.config.memory_ceiling;
        let Some(used) = self.gauge.resident_bytes() else {
            return;
        };
        if used <= ceiling {
            self.in_breach = false;
            return;
        }
        // A peak reading cannot drop after a release; warn without
        // discarding context or cache on every flush
        if self.gauge.reports_peak() {
            self.warn_breach(used, ceiling, 0);
            return;
        }

        let cleared = self.cache.clear();
        let overshoot = usize::try_from(used - ceiling).unwrap_or(usize::MAX);
        let released = self.index.write().compact_least_recent(overshoot);
        debug!(
            resident = used,
            ceiling,
            cache_entries = cleared,
            context_bytes = released,
            "released memory above ceiling"
        );

        let after = self.gauge.resident_bytes().unwrap_or(used);
        if after <= ceiling {
            self.in_breach = false;
            return;
        }
        self.warn_breach(after, ceiling, released);
    }

    /// Warn once per breach
    fn warn_breach(&mut self, resident_bytes: u64, ceiling: u64, released_bytes: usize) {
        if self.in_breach {
            return;
        }

        self.in_breach = true;
        self.summary.resource_warnings += 1;
        let warning = ResourceWarning {
            resident_bytes,
            ceiling,
            released_bytes,
        };
        warn!(%warning, "continuing with degraded caching");
        self.sink.send(SearchEvent::ResourceWarning(warning));
    }

    /// A file's output ended
    pub fn file_finished(&mut self, path: &Path) {
        self.files_finished += 1;
        if self.tool_stats.is_none() {
            self.progress.set_files_scanned(self.files_finished);
        }
        debug!(path = %path.display(), "file finished");
    }

    /// Totals reported by the tool
    pub fn record_stats(&mut self, stats: ToolStats) {
        self.progress.set_files_scanned(stats.files_scanned);
        self.tool_stats = Some(stats);
    }

    pub fn record_skipped(&mut self, skipped: usize) {
        self.summary.skipped_records = skipped;
        self.progress.set_skipped(skipped);
    }

    /// End the search: flush what is left (unless cancelled), emit
    /// `Finished` and return the final summary
    pub fn finish(mut self, status: SearchStatus, error: Option<String>) -> SearchSummary {
        if status == SearchStatus::Cancelled || self.cancel.is_cancelled() {
            self.pending.clear();
        } else {
            self.flush(FlushReason::Final);
        }

        let index = self.index.read();
        self.summary.total_matches = index.total_matches();
        self.summary.files_with_matches = index.files_with_matches();
        drop(index);

        self.summary.files_scanned = self
            .tool_stats
            .map_or(self.files_finished, |stats| stats.files_scanned);
        self.summary.elapsed = self.started.elapsed();
        self.summary.status = status;
        self.summary.error = error;

        info!(
            pattern = %self.summary.pattern,
            status = %status,
            matches = self.summary.total_matches,
            files = self.summary.files_with_matches,
            flushes = self.sequence,
            elapsed_ms = self.summary.elapsed.as_millis() as u64,
            "search finished"
        );
        self.sink.send(SearchEvent::Finished(self.summary.clone()));
        self.summary
    }
}
