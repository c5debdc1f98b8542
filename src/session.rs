//! Search sessions
//!
//! [`SearchEngine`] owns the long-lived pieces (runner, metadata cache,
//! memory gauge) and at most one active [`SearchSession`]. Each session
//! parses and aggregates on its own worker thread. The only blocking point
//! in the worker is a `recv_timeout` bounded by the poll interval and by
//! the aggregator's next scheduled flush.

use crate::aggregate::{
    Admission, BatchAggregator, MemoryGauge, MetadataCache, ProcessMemory, SearchEvent,
    SearchProgress,
};
use crate::config::EngineConfig;
use crate::error::{Result, SearchError};
use crate::index::SharedIndex;
use crate::parse::{ParseEvent, StreamParser};
use crate::search::command::{CommandBuilder, SearchCommand};
use crate::search::process::{CancelToken, ExitOutcome, ProcessEvent, ProcessHandle, ProcessRunner};
use crate::search::types::{OutputFormat, SearchParameters, SearchStatus, SearchSummary};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Runs searches one at a time
pub struct SearchEngine {
    config: EngineConfig,
    builder: CommandBuilder,
    runner: ProcessRunner,
    cache: MetadataCache,
    gauge: Arc<dyn MemoryGauge>,
    active: Option<SearchSession>,
}

impl SearchEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            builder: config.command_builder(),
            runner: config.runner(),
            cache: MetadataCache::new(config.metadata_cache_size),
            gauge: Arc::new(ProcessMemory),
            active: None,
            config,
        }
    }

    /// Replace the memory gauge used by the ceiling check
    pub fn with_memory_gauge(mut self, gauge: Arc<dyn MemoryGauge>) -> Self {
        self.gauge = gauge;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Validate `params` and start searching.
    ///
    /// Invalid parameters are returned as errors and leave any active
    /// search untouched. Otherwise the active search is cancelled and
    /// drained first, the metadata cache is emptied, and the new session
    /// gets a fresh index.
    pub fn start(&mut self, params: SearchParameters) -> Result<&SearchSession> {
        let command = self.builder.build(&params)?;

        if let Some(previous) = self.active.take() {
            previous.cancel();
            let summary = previous.wait();
            debug!(pattern = %summary.pattern, status = %summary.status, "replaced active search");
        }
        // Files may have changed since the last search
        let stale = self.cache.clear();
        if stale > 0 {
            debug!(entries = stale, "cleared metadata cache");
        }

        let session = SearchSession::spawn(
            Arc::new(params),
            command,
            WorkerContext {
                builder: self.builder.clone(),
                runner: self.runner.clone(),
                cache: self.cache.clone(),
                gauge: Arc::clone(&self.gauge),
                config: self.config.clone(),
            },
        )?;
        Ok(self.active.insert(session))
    }

    /// Cancel the active search, if any
    pub fn cancel(&self) -> bool {
        self.active.as_ref().is_some_and(SearchSession::cancel)
    }

    pub fn active(&self) -> Option<&SearchSession> {
        self.active.as_ref()
    }

    /// Wait for the active search and release it
    pub fn finish_active(&mut self) -> Option<SearchSummary> {
        self.active.take().map(|session| session.wait())
    }
}

/// Shared pieces handed to a session's worker
struct WorkerContext {
    builder: CommandBuilder,
    runner: ProcessRunner,
    cache: MetadataCache,
    gauge: Arc<dyn MemoryGauge>,
    config: EngineConfig,
}

/// One running (or finished) search.
/// Dropping the session cancels it and waits for the worker.
pub struct SearchSession {
    params: Arc<SearchParameters>,
    index: SharedIndex,
    progress: Arc<SearchProgress>,
    cancel: CancelToken,
    events: Receiver<SearchEvent>,
    worker: Mutex<Option<JoinHandle<SearchSummary>>>,
    summary: OnceLock<SearchSummary>,
}

impl SearchSession {
    fn spawn(
        params: Arc<SearchParameters>,
        command: SearchCommand,
        ctx: WorkerContext,
    ) -> Result<Self> {
        let index = SharedIndex::new();
        let progress = Arc::new(SearchProgress::default());
        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();

        let aggregator = BatchAggregator::new(
            params.pattern.clone(),
            ctx.config.aggregator(params.max_results),
            index.clone(),
            ctx.cache.clone(),
            tx,
            cancel.clone(),
        )
        .with_gauge(Arc::clone(&ctx.gauge))
        .with_progress(Arc::clone(&progress));

        let worker = Worker {
            params: Arc::clone(&params),
            builder: ctx.builder,
            runner: ctx.runner,
            cancel: cancel.clone(),
            poll_interval: ctx.config.poll_interval(),
        };

        let handle = thread::Builder::new()
            .name("search-worker".to_string())
            .spawn(move || worker.run(command, aggregator))
            .map_err(SearchError::Io)?;

        Ok(Self {
            params,
            index,
            progress,
            cancel,
            events: rx,
            worker: Mutex::new(Some(handle)),
            summary: OnceLock::new(),
        })
    }

    pub fn params(&self) -> &SearchParameters {
        &self.params
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn progress(&self) -> &SearchProgress {
        &self.progress
    }

    /// Batches, progress and warnings as they happen; `Finished` comes last
    pub fn events(&self) -> &Receiver<SearchEvent> {
        &self.events
    }

    /// A token other threads can use to cancel this search
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Idempotent. Returns true only for the request that took effect.
    pub fn cancel(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        let first = self.cancel.cancel();
        if first {
            debug!(pattern = %self.params.pattern, "search cancellation requested");
        }
        first
    }

    pub fn is_finished(&self) -> bool {
        self.summary.get().is_some()
            || self
                .worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .is_none_or(JoinHandle::is_finished)
    }

    pub fn status(&self) -> SearchStatus {
        if self.is_finished() {
            self.wait().status
        } else {
            SearchStatus::Running
        }
    }

    /// Block until the search ends. Later calls return the same summary.
    pub fn wait(&self) -> SearchSummary {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = worker.take() {
            let summary = handle.join().unwrap_or_else(|_| {
                self.failed_summary("search worker panicked")
            });
            let _ = self.summary.set(summary);
        }
        drop(worker);

        self.summary
            .get()
            .cloned()
            .unwrap_or_else(|| self.failed_summary("search worker is gone"))
    }

    fn failed_summary(&self, reason: &str) -> SearchSummary {
        let mut summary = SearchSummary::new(self.params.pattern.clone());
        summary.status = SearchStatus::Errored;
        summary.error = Some(reason.to_string());
        summary.total_matches = self.index.total_matches();
        summary.files_with_matches = self.index.files_with_matches();
        summary
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        self.cancel();
        self.wait();
    }
}

/// How one process run ended, from the worker's point of view
struct RunResult {
    exit: ExitOutcome,
    produced_output: bool,
    limit_reached: bool,
}

struct Worker {
    params: Arc<SearchParameters>,
    builder: CommandBuilder,
    runner: ProcessRunner,
    cancel: CancelToken,
    poll_interval: Duration,
}

impl Worker {
    fn run(
        self,
        mut command: SearchCommand,
        mut aggregator: BatchAggregator<Sender<SearchEvent>>,
    ) -> SearchSummary {
        let mut retried = false;

        loop {
            let handle = match self.runner.start(&command) {
                Ok(handle) => handle,
                Err(e) => {
                    warn!(error = %e, "search tool could not be started");
                    return aggregator.finish(SearchStatus::Errored, Some(e.to_string()));
                }
            };
            let run = self.drive(&handle, command.format(), &mut aggregator);

            if !retried && !self.cancel.is_cancelled() && needs_plain_fallback(&command, &run) {
                match self.builder.build_with_format(&self.params, OutputFormat::Plain) {
                    Ok(plain) => {
                        info!("search tool rejected JSON output, retrying with plain output");
                        command = plain;
                        retried = true;
                        continue;
                    }
                    Err(e) => warn!(error = %e, "could not build plain fallback command"),
                }
            }

            let (status, error) = if self.cancel.is_cancelled() {
                (SearchStatus::Cancelled, None)
            } else if run.limit_reached {
                (SearchStatus::Completed, None)
            } else {
                (run.exit.status(), run.exit.error_message())
            };
            if let Some(error) = &error {
                warn!(error = %error, "search failed");
            }

            return aggregator.finish(status, error);
        }
    }

    /// Pump one process run through the parser into the aggregator
    fn drive(
        &self,
        handle: &ProcessHandle,
        format: OutputFormat,
        aggregator: &mut BatchAggregator<Sender<SearchEvent>>,
    ) -> RunResult {
        let mut parser =
            StreamParser::new(format, self.params.context_lines).with_cancel(self.cancel.clone());
        let mut produced_output = false;
        let mut limit_reached = false;

        loop {
            if self.cancel.is_cancelled() {
                handle.cancel();
            }

            let wait = aggregator
                .time_until_flush()
                .map_or(self.poll_interval, |due| due.min(self.poll_interval));

            match handle.recv_timeout(wait) {
                Ok(ProcessEvent::Output(chunk)) => {
                    produced_output = true;
                    let parsed = parser.feed(&chunk);
                    self.apply(parsed, handle, aggregator, &mut limit_reached);
                    aggregator.record_skipped(parser.skipped());
                    aggregator.tick();
                }
                Ok(ProcessEvent::Exited(exit)) => {
                    let parsed = parser.finish();
                    self.apply(parsed, handle, aggregator, &mut limit_reached);
                    aggregator.record_skipped(parser.skipped());
                    debug!(id = handle.id(), ?exit, "search process exited");
                    return RunResult {
                        exit,
                        produced_output,
                        limit_reached,
                    };
                }
                Err(RecvTimeoutError::Timeout) => {
                    aggregator.tick();
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return RunResult {
                        exit: ExitOutcome::Failed {
                            code: None,
                            stderr: "search process supervisor stopped unexpectedly".to_string(),
                        },
                        produced_output,
                        limit_reached,
                    };
                }
            }
        }
    }

    fn apply(
        &self,
        parsed: Vec<ParseEvent>,
        handle: &ProcessHandle,
        aggregator: &mut BatchAggregator<Sender<SearchEvent>>,
        limit_reached: &mut bool,
    ) {
        for event in parsed {
            match event {
                ParseEvent::Match { path, record } => {
                    if *limit_reached {
                        continue;
                    }
                    match aggregator.process(path, record) {
                        Admission::Accepted => {}
                        Admission::LimitReached => {
                            *limit_reached = true;
                            handle.cancel();
                        }
                        Admission::Cancelled => return,
                    }
                }
                ParseEvent::FileEnd(path) => aggregator.file_finished(&path),
                ParseEvent::Summary(stats) => aggregator.record_stats(stats),
                ParseEvent::FileBegin(_) => {}
            }
        }
    }
}

/// A JSON run that failed before printing anything, complaining about the
/// flag, is retried in plain mode
fn needs_plain_fallback(command: &SearchCommand, run: &RunResult) -> bool {
    if command.format() != OutputFormat::Json || run.produced_output {
        return false;
    }
    match &run.exit {
        ExitOutcome::Failed { stderr, .. } => stderr.to_ascii_lowercase().contains("json"),
        _ => false,
    }
}
