//! Subprocess management for the search tool
//!
//! Each started command gets three threads: one pumping stdout into the
//! event channel as chunks arrive, one draining stderr, and a supervisor
//! that polls for exit or cancellation. Cancellation sends SIGTERM to the
//! child's process group and escalates to SIGKILL after the grace period.

use crate::error::{Result, SearchError};
use crate::search::command::SearchCommand;
use crate::search::types::SearchStatus;
use std::collections::HashMap;
use std::io::{self, Read};
use std::process::{Child, ChildStderr, ChildStdout, ExitStatus};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time a cancelled process gets to exit after SIGTERM before it is killed
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Upper bound on any single blocking wait in the pipeline
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(25);

const READ_CHUNK_SIZE: usize = 16 * 1024;

/// Output chunks buffered between the stdout reader and the consumer.
/// A full channel blocks the reader, and with it the child's writes.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 64;

/// Stderr beyond this is drained but not kept
const STDERR_LIMIT: u64 = 64 * 1024;

/// ripgrep exits with 1 when nothing matched
const NO_MATCHES_EXIT_CODE: i32 = 1;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns true only for the first request.
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Identifier of a started process within its runner
pub type ProcessId = u64;

/// How a process run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    /// The tool reported that nothing matched
    NoMatches,
    Cancelled,
    Failed { code: Option<i32>, stderr: String },
}

impl ExitOutcome {
    pub fn status(&self) -> SearchStatus {
        match self {
            ExitOutcome::Success | ExitOutcome::NoMatches => SearchStatus::Completed,
            ExitOutcome::Cancelled => SearchStatus::Cancelled,
            ExitOutcome::Failed { .. } => SearchStatus::Errored,
        }
    }

    /// Human-readable failure description
    pub fn error_message(&self) -> Option<String> {
        match self {
            ExitOutcome::Failed { code, stderr } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                let detail = stderr.trim();
                Some(if detail.is_empty() {
                    format!("search tool exited with status {}", code)
                } else {
                    format!("search tool exited with status {}: {}", code, detail)
                })
            }
            _ => None,
        }
    }
}

/// Events delivered through a [`ProcessHandle`]
#[derive(Debug)]
pub enum ProcessEvent {
    /// Bytes read from stdout, in order. Chunk boundaries are arbitrary.
    Output(Vec<u8>),
    /// Always the last event of a run
    Exited(ExitOutcome),
}

struct RunControl {
    cancel: CancelToken,
    state: Mutex<SearchStatus>,
}

impl RunControl {
    fn state(&self) -> SearchStatus {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, status: SearchStatus) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn cancel(&self) -> bool {
        if self.state().is_terminal() {
            return false;
        }
        self.cancel.cancel()
    }
}

struct RunnerInner {
    registry: Mutex<HashMap<ProcessId, Arc<RunControl>>>,
    next_id: AtomicU64,
    grace: Duration,
    poll_interval: Duration,
}

/// Starts search processes and tracks them for cancellation by id
#[derive(Clone)]
pub struct ProcessRunner {
    inner: Arc<RunnerInner>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CANCEL_GRACE, DEFAULT_POLL_INTERVAL)
    }
}

impl ProcessRunner {
    pub fn new(grace: Duration, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(RunnerInner {
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                grace,
                poll_interval: poll_interval.max(Duration::from_millis(1)),
            }),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// Launch `command`. Output starts flowing immediately.
    pub fn start(&self, command: &SearchCommand) -> Result<ProcessHandle> {
        let mut cmd = command.to_command();
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group so cancellation reaches helpers the tool spawns
            cmd.process_group(0);
        }

        let program = command.program().to_string_lossy().into_owned();
        let mut child = cmd
            .spawn()
            .map_err(|e| SearchError::launch(program.clone(), e))?;

        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(out), Some(err)) => (out, err),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SearchError::Io(io::Error::other(
                    "child output pipes were not captured",
                )));
            }
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let control = Arc::new(RunControl {
            cancel: CancelToken::new(),
            state: Mutex::new(SearchStatus::Running),
        });
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&control));

        let (tx, rx) = mpsc::sync_channel(OUTPUT_CHANNEL_CAPACITY);

        let pump = {
            let tx = tx.clone();
            let cancel = control.cancel.clone();
            thread::Builder::new()
                .name(format!("search-stdout-{}", id))
                .spawn(move || pump_stdout(stdout, tx, cancel))
        };
        let drain = thread::Builder::new()
            .name(format!("search-stderr-{}", id))
            .spawn(move || collect_stderr(stderr));

        let (pump, drain) = match (pump, drain) {
            (Ok(pump), Ok(drain)) => (pump, drain),
            (pump, drain) => {
                let err = pump.err().or(drain.err()).unwrap_or_else(|| {
                    io::Error::other("failed to spawn output threads")
                });
                let _ = child.kill();
                let _ = child.wait();
                self.forget(id);
                return Err(SearchError::Io(err));
            }
        };

        debug!(id, command = %command.display(), pid = child.id(), "search process started");

        let supervisor = Supervisor {
            id,
            child,
            pump,
            drain,
            control: Arc::clone(&control),
            events: tx,
            grace: self.inner.grace,
            poll_interval: self.inner.poll_interval,
        };
        let runner = self.clone();
        thread::Builder::new()
            .name(format!("search-supervisor-{}", id))
            .spawn(move || {
                supervisor.run();
                runner.forget(id);
            })?;

        Ok(ProcessHandle {
            id,
            control,
            events: rx,
            poll_interval: self.inner.poll_interval,
        })
    }

    /// Request cancellation of a running process.
    /// Unknown or already finished ids are ignored.
    pub fn cancel(&self, id: ProcessId) -> bool {
        let control = self
            .inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        control.is_some_and(|c| c.cancel())
    }

    /// Number of processes that have not finished yet
    pub fn running(&self) -> usize {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn forget(&self, id: ProcessId) {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

/// Receiving end of one process run.
/// Dropping the handle cancels the process if it is still running.
pub struct ProcessHandle {
    id: ProcessId,
    control: Arc<RunControl>,
    events: Receiver<ProcessEvent>,
    poll_interval: Duration,
}

impl ProcessHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn state(&self) -> SearchStatus {
        self.control.state()
    }

    /// Idempotent; has no effect once the process has finished
    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.cancel.is_cancelled()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> std::result::Result<ProcessEvent, RecvTimeoutError> {
        self.events.recv_timeout(timeout)
    }

    /// Block for the next event, waking every poll interval.
    /// Returns `None` once the run is over and all events were consumed.
    pub fn next_event(&self) -> Option<ProcessEvent> {
        loop {
            match self.events.recv_timeout(self.poll_interval) {
                Ok(event) => return Some(event),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Drain the run, concatenating output, until it exits
    pub fn collect(self) -> (Vec<u8>, ExitOutcome) {
        let mut output = Vec::new();
        while let Some(event) = self.next_event() {
            match event {
                ProcessEvent::Output(chunk) => output.extend_from_slice(&chunk),
                ProcessEvent::Exited(outcome) => return (output, outcome),
            }
        }
        (output, ExitOutcome::Cancelled)
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.control.cancel();
    }
}

fn pump_stdout(mut stdout: ChildStdout, tx: SyncSender<ProcessEvent>, cancel: CancelToken) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                // Output read after cancellation is discarded
                if cancel.is_cancelled() || tx.send(ProcessEvent::Output(buf[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!(error = %e, "stdout read failed");
                break;
            }
        }
    }
}

fn collect_stderr(stderr: ChildStderr) -> String {
    let mut kept = Vec::new();
    let mut limited = stderr.take(STDERR_LIMIT);
    let _ = limited.read_to_end(&mut kept);
    // Keep draining so a chatty child never blocks on a full pipe
    let _ = io::copy(&mut limited.into_inner(), &mut io::sink());
    String::from_utf8_lossy(&kept).into_owned()
}

enum Ended {
    Exited(ExitStatus),
    Cancelled,
    WaitFailed(io::Error),
}

struct Supervisor {
    id: ProcessId,
    child: Child,
    pump: JoinHandle<()>,
    drain: JoinHandle<String>,
    control: Arc<RunControl>,
    events: SyncSender<ProcessEvent>,
    grace: Duration,
    poll_interval: Duration,
}

impl Supervisor {
    fn run(mut self) {
        let ended = loop {
            if self.control.cancel.is_cancelled() {
                terminate(&mut self.child, self.grace, self.poll_interval);
                break Ended::Cancelled;
            }
            match self.child.try_wait() {
                Ok(Some(status)) => break Ended::Exited(status),
                Ok(None) => thread::sleep(self.poll_interval),
                Err(e) => {
                    terminate(&mut self.child, self.grace, self.poll_interval);
                    break Ended::WaitFailed(e);
                }
            }
        };

        let outcome = match ended {
            // Reader threads are left to finish on their own once the pipes close
            Ended::Cancelled => ExitOutcome::Cancelled,
            Ended::WaitFailed(e) => ExitOutcome::Failed {
                code: None,
                stderr: e.to_string(),
            },
            Ended::Exited(status) => {
                // All stdout must be delivered before the exit event
                let _ = self.pump.join();
                let stderr = self.drain.join().unwrap_or_default();
                if self.control.cancel.is_cancelled() {
                    ExitOutcome::Cancelled
                } else {
                    classify(status, stderr)
                }
            }
        };

        debug!(id = self.id, ?outcome, "search process finished");
        if let ExitOutcome::Failed { code, .. } = &outcome {
            warn!(id = self.id, ?code, "search process failed");
        }

        self.control.set_state(outcome.status());
        let _ = self.events.send(ProcessEvent::Exited(outcome));
    }
}

fn classify(status: ExitStatus, stderr: String) -> ExitOutcome {
    match status.code() {
        Some(0) => ExitOutcome::Success,
        Some(NO_MATCHES_EXIT_CODE) => ExitOutcome::NoMatches,
        code => ExitOutcome::Failed { code, stderr },
    }
}

/// SIGTERM the process group, wait up to `grace`, then SIGKILL
fn terminate(child: &mut Child, grace: Duration, poll_interval: Duration) {
    #[cfg(unix)]
    {
        let pgid = child.id() as libc::pid_t;
        unsafe {
            libc::kill(-pgid, libc::SIGTERM);
        }

        let deadline = Instant::now() + grace;
        loop {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    thread::sleep(poll_interval.min(deadline - now));
                }
                Err(_) => break,
            }
        }

        debug!(pid = pgid, "process ignored SIGTERM, killing");
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (grace, poll_interval, Instant::now());
    }

    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::search::types::OutputFormat;

    fn sh(script: &str) -> SearchCommand {
        SearchCommand::new("sh", ["-c", script], OutputFormat::Plain)
    }

    fn quick_runner() -> ProcessRunner {
        ProcessRunner::new(Duration::from_millis(200), Duration::from_millis(5))
    }

    #[test]
    fn test_cancel_token_first_request_wins() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        assert!(token.cancel());
        assert!(!clone.cancel());
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_collects_output_and_success() {
        let runner = quick_runner();
        let handle = runner.start(&sh("printf 'a\\nb\\n'")).unwrap();
        let (output, outcome) = handle.collect();
        assert_eq!(output, b"a\nb\n");
        assert_eq!(outcome, ExitOutcome::Success);
    }

    #[test]
    fn test_exit_one_means_no_matches() {
        let (_, outcome) = quick_runner().start(&sh("exit 1")).unwrap().collect();
        assert_eq!(outcome, ExitOutcome::NoMatches);
        assert_eq!(outcome.status(), SearchStatus::Completed);
    }

    #[test]
    fn test_other_exit_codes_fail_with_stderr() {
        let (_, outcome) = quick_runner()
            .start(&sh("echo 'regex parse error' >&2; exit 2"))
            .unwrap()
            .collect();
        assert_eq!(outcome.status(), SearchStatus::Errored);
        let message = outcome.error_message().unwrap();
        assert!(message.contains("status 2"));
        assert!(message.contains("regex parse error"));
    }

    #[test]
    fn test_missing_executable_is_launch_error() {
        let cmd = SearchCommand::new(
            "/definitely/not/a/real/rg",
            Vec::<String>::new(),
            OutputFormat::Json,
        );
        let err = quick_runner().start(&cmd).err().unwrap();
        assert!(matches!(err, SearchError::Launch { .. }));
    }

    #[test]
    fn test_output_streams_before_exit() {
        let runner = quick_runner();
        let handle = runner.start(&sh("echo first; sleep 1; echo second")).unwrap();

        match handle.recv_timeout(Duration::from_millis(800)) {
            Ok(ProcessEvent::Output(chunk)) => assert_eq!(chunk, b"first\n"),
            other => panic!("expected early output, got {:?}", other),
        }
        handle.cancel();
    }

    #[test]
    fn test_cancel_terminates_within_grace() {
        let runner = quick_runner();
        let handle = runner.start(&sh("sleep 30")).unwrap();
        assert_eq!(runner.running(), 1);

        let start = Instant::now();
        assert!(runner.cancel(handle.id()));
        let (_, outcome) = handle.collect();

        assert_eq!(outcome, ExitOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_sigterm_ignored_escalates_to_kill() {
        let runner = quick_runner();
        let handle = runner
            .start(&sh("trap '' TERM; while :; do :; done"))
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        handle.cancel();
        let id = handle.id();
        let (_, outcome) = handle.collect();

        assert_eq!(outcome, ExitOutcome::Cancelled);
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(start.elapsed() < Duration::from_secs(3));
        assert!(!runner.cancel(id));
    }

    #[test]
    fn test_cancel_after_completion_is_noop() {
        let runner = quick_runner();
        let handle = runner.start(&sh("true")).unwrap();
        let id = handle.id();
        while let Some(event) = handle.next_event() {
            if let ProcessEvent::Exited(outcome) = event {
                assert_eq!(outcome, ExitOutcome::Success);
            }
        }

        assert!(!handle.cancel());
        assert!(!handle.cancel());
        assert!(!runner.cancel(id));
        assert_eq!(handle.state(), SearchStatus::Completed);
    }

    #[test]
    fn test_concurrent_handles_are_independent() {
        let runner = quick_runner();
        let slow = runner.start(&sh("sleep 30")).unwrap();
        let fast = runner.start(&sh("echo done")).unwrap();
        assert_ne!(slow.id(), fast.id());

        slow.cancel();
        let (output, outcome) = fast.collect();
        assert_eq!(output, b"done\n");
        assert_eq!(outcome, ExitOutcome::Success);
        assert_eq!(slow.collect().1, ExitOutcome::Cancelled);
    }

    #[test]
    fn test_unread_output_blocks_the_child() {
        let runner = quick_runner();
        let handle = runner.start(&sh("head -c 67108864 /dev/zero")).unwrap();
        thread::sleep(Duration::from_millis(300));

        // Only a bounded amount is buffered, so the writer cannot finish yet
        assert_eq!(handle.state(), SearchStatus::Running);

        let (output, outcome) = handle.collect();
        assert_eq!(output.len(), 64 * 1024 * 1024);
        assert_eq!(outcome, ExitOutcome::Success);
    }
}
