//! Incremental decoding of search tool output
//!
//! [`StreamParser`] accepts output in arbitrarily-sized chunks and yields
//! [`ParseEvent`]s. Only complete lines are decoded; a partial trailing line
//! waits for the chunk carrying its newline, so the produced events do not
//! depend on how the output was chunked.
//!
//! ## Modules
//!
//! - [`ansi`] - Escape stripping and highlight span extraction
//! - `json` - `rg --json` messages
//! - `plain` - Colored `path:line:column:content` lines
//!
//! A match is held back until the next record arrives so that trailing
//! context lines can be attached to it.

pub mod ansi;
mod json;
mod plain;

use crate::search::process::CancelToken;
use crate::search::types::{ContextLine, OutputFormat, SearchMatch};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Longest prefix of an offending line included in warnings
const WARN_PREVIEW_LEN: usize = 120;

/// Totals reported by the tool at the end of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ToolStats {
    pub files_scanned: u64,
    pub files_with_matches: u64,
    pub matches: u64,
    pub elapsed: Option<Duration>,
}

/// Output of the parser
#[derive(Debug, Clone, PartialEq)]
pub enum ParseEvent {
    FileBegin(PathBuf),
    Match { path: PathBuf, record: SearchMatch },
    FileEnd(PathBuf),
    Summary(ToolStats),
}

/// One decoded line
pub(crate) enum Record {
    Begin(PathBuf),
    Match(PathBuf, SearchMatch),
    Context(PathBuf, ContextLine),
    End(PathBuf),
    Summary(ToolStats),
    Separator,
}

/// Splits a byte stream into lines without the trailing `\n` / `\r\n`
#[derive(Debug, Default)]
struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8], mut emit: impl FnMut(&[u8])) {
        let mut start = 0;
        for newline in memchr::memchr_iter(b'\n', chunk) {
            let piece = &chunk[start..newline];
            if self.partial.is_empty() {
                emit(trim_cr(piece));
            } else {
                self.partial.extend_from_slice(piece);
                emit(trim_cr(&self.partial));
                self.partial.clear();
            }
            start = newline + 1;
        }
        self.partial.extend_from_slice(&chunk[start..]);
    }

    fn take_remainder(&mut self) -> Option<Vec<u8>> {
        if self.partial.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.partial))
        }
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Streaming parser for one search run. Not restartable.
pub struct StreamParser {
    format: OutputFormat,
    /// Context window requested from the tool; 0 attaches every
    /// context line that follows a match to that match
    context_lines: u32,
    lines: LineBuffer,
    current: Option<PathBuf>,
    pending: Option<SearchMatch>,
    before: VecDeque<ContextLine>,
    skipped: usize,
    cancel: Option<CancelToken>,
    finished: bool,
}

impl StreamParser {
    pub fn new(format: OutputFormat, context_lines: u32) -> Self {
        Self {
            format,
            context_lines,
            lines: LineBuffer::default(),
            current: None,
            pending: None,
            before: VecDeque::new(),
            skipped: 0,
            cancel: None,
            finished: false,
        }
    }

    /// Stop producing events once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Number of records dropped as malformed so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Feed the next chunk of output
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<ParseEvent> {
        let mut out = Vec::new();
        if self.finished {
            debug!("ignoring output fed to a finished parser");
            return out;
        }
        if self.is_cancelled() {
            return out;
        }

        let mut lines = std::mem::take(&mut self.lines);
        lines.push(chunk, |line| self.decode_line(line, &mut out));
        self.lines = lines;

        if self.is_cancelled() {
            out.clear();
        }
        out
    }

    /// Signal end of output: decodes any unterminated last line and
    /// closes the open file
    pub fn finish(&mut self) -> Vec<ParseEvent> {
        let mut out = Vec::new();
        if self.finished {
            return out;
        }
        self.finished = true;
        if self.is_cancelled() {
            return out;
        }

        if let Some(rest) = self.lines.take_remainder() {
            self.decode_line(trim_cr(&rest), &mut out);
        }
        self.close_file(&mut out);
        out
    }

    /// Lazily parse everything `reader` produces
    pub fn events<R: Read>(self, reader: R) -> ReaderEvents<R> {
        ReaderEvents {
            reader,
            parser: self,
            queue: VecDeque::new(),
            buf: vec![0u8; 16 * 1024],
            done: false,
        }
    }

    fn decode_line(&mut self, line: &[u8], out: &mut Vec<ParseEvent>) {
        if line.is_empty() || self.is_cancelled() {
            return;
        }

        let decoded = match self.format {
            OutputFormat::Json => json::decode(line),
            OutputFormat::Plain => plain::decode(line, self.current.as_deref()),
        };

        match decoded {
            Ok(record) => self.apply(record, out),
            Err(reason) => {
                self.skipped += 1;
                warn!(
                    reason = %reason,
                    line = %preview(line),
                    "skipping malformed search output record"
                );
            }
        }
    }

    fn apply(&mut self, record: Record, out: &mut Vec<ParseEvent>) {
        match record {
            Record::Begin(path) => self.enter(path, out),
            Record::Match(path, mut m) => {
                self.enter(path, out);
                self.flush_pending(out);
                m.context_before = self.before.drain(..).collect();
                self.pending = Some(m);
            }
            Record::Context(path, ctx) => {
                self.enter(path, out);
                self.add_context(ctx, out);
            }
            Record::End(path) => {
                if self.current.as_deref() != Some(path.as_path()) {
                    debug!(path = %path.display(), "end record for a file that is not open");
                }
                self.close_file(out);
            }
            Record::Summary(stats) => {
                self.close_file(out);
                out.push(ParseEvent::Summary(stats));
            }
            Record::Separator => {}
        }
    }

    fn add_context(&mut self, ctx: ContextLine, out: &mut Vec<ParseEvent>) {
        let window = self.context_lines;
        if let Some(pending) = &mut self.pending {
            let after = ctx.line_number > pending.line_number
                && (window == 0 || ctx.line_number - pending.line_number <= window);
            if after {
                pending.context_after.push(ctx);
                return;
            }
        }

        self.flush_pending(out);
        self.before.push_back(ctx);
        if window > 0 {
            while self.before.len() > window as usize {
                self.before.pop_front();
            }
        }
    }

    fn enter(&mut self, path: PathBuf, out: &mut Vec<ParseEvent>) {
        if self.current.as_ref() == Some(&path) {
            return;
        }
        self.close_file(out);
        out.push(ParseEvent::FileBegin(path.clone()));
        self.current = Some(path);
    }

    fn flush_pending(&mut self, out: &mut Vec<ParseEvent>) {
        if let (Some(record), Some(path)) = (self.pending.take(), self.current.as_ref()) {
            out.push(ParseEvent::Match {
                path: path.clone(),
                record,
            });
        }
    }

    fn close_file(&mut self, out: &mut Vec<ParseEvent>) {
        self.flush_pending(out);
        self.before.clear();
        if let Some(path) = self.current.take() {
            out.push(ParseEvent::FileEnd(path));
        }
    }

    /// Path of the file currently being decoded
    pub fn current_file(&self) -> Option<&Path> {
        self.current.as_deref()
    }
}

fn preview(line: &[u8]) -> String {
    let end = line.len().min(WARN_PREVIEW_LEN);
    String::from_utf8_lossy(&line[..end]).into_owned()
}

/// Iterator adapter returned by [`StreamParser::events`]
pub struct ReaderEvents<R> {
    reader: R,
    parser: StreamParser,
    queue: VecDeque<ParseEvent>,
    buf: Vec<u8>,
    done: bool,
}

impl<R> ReaderEvents<R> {
    pub fn skipped(&self) -> usize {
        self.parser.skipped()
    }
}

impl<R: Read> Iterator for ReaderEvents<R> {
    type Item = io::Result<ParseEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(event) = self.queue.pop_front() {
                return Some(Ok(event));
            }
            if self.done {
                return None;
            }
            match self.reader.read(&mut self.buf) {
                Ok(0) => {
                    self.queue.extend(self.parser.finish());
                    self.done = true;
                }
                Ok(n) => {
                    let events = self.parser.feed(&self.buf[..n]);
                    self.queue.extend(events);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
