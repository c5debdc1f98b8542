use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cap on accepted matches for a single search
pub const DEFAULT_MAX_RESULTS: usize = 10_000;

/// Output format requested from the search tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Line-delimited JSON messages (`rg --json`)
    #[default]
    Json,
    /// `path:line:column:content` lines with terminal colors
    Plain,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "plain" | "text" => Ok(OutputFormat::Plain),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Parameters for one user-initiated search.
///
/// Set-valued options use ordered sets so the same parameters always
/// produce the same command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParameters {
    pub pattern: String,
    pub root: PathBuf,
    pub case_sensitive: bool,
    pub whole_word: bool,
    /// Treat the pattern as a regex (otherwise a fixed string)
    pub regex: bool,
    pub context_lines: u32,
    pub max_results: usize,
    pub file_types: BTreeSet<String>,
    pub exclude_globs: BTreeSet<String>,
    pub max_depth: Option<u32>,
    pub follow_symlinks: bool,
    pub include_hidden: bool,
}

impl SearchParameters {
    pub fn new(pattern: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            root: root.into(),
            case_sensitive: true,
            whole_word: false,
            regex: true,
            context_lines: 0,
            max_results: DEFAULT_MAX_RESULTS,
            file_types: BTreeSet::new(),
            exclude_globs: BTreeSet::new(),
            max_depth: None,
            follow_symlinks: false,
            include_hidden: false,
        }
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_sensitive = false;
        self
    }

    pub fn fixed_string(mut self) -> Self {
        self.regex = false;
        self
    }

    pub fn whole_word(mut self) -> Self {
        self.whole_word = true;
        self
    }

    pub fn with_context(mut self, lines: u32) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    pub fn with_file_type(mut self, file_type: impl Into<String>) -> Self {
        self.file_types.insert(file_type.into());
        self
    }

    pub fn with_exclude(mut self, glob: impl Into<String>) -> Self {
        self.exclude_globs.insert(glob.into());
        self
    }

    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }
}

/// What a highlight span marks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Match,
    Context,
}

/// Byte range within a line. `end` stays `None` while the span is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightSpan {
    pub start: usize,
    pub end: Option<usize>,
    pub kind: SpanKind,
}

impl HighlightSpan {
    pub fn open(start: usize, kind: SpanKind) -> Self {
        Self {
            start,
            end: None,
            kind,
        }
    }

    pub fn closed(start: usize, end: usize, kind: SpanKind) -> Self {
        Self {
            start,
            end: Some(end.max(start)),
            kind,
        }
    }

    /// Close the span. An end before the start collapses to an empty span.
    pub fn close(&mut self, end: usize) {
        self.end = Some(end.max(self.start));
    }

    pub fn is_closed(&self) -> bool {
        self.end.is_some()
    }

    pub fn len(&self) -> usize {
        self.end.map_or(0, |end| end - self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A non-matching line shown next to a match
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextLine {
    pub line_number: u32,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<HighlightSpan>,
}

impl ContextLine {
    pub fn new(line_number: u32, content: impl Into<String>) -> Self {
        Self {
            line_number,
            content: content.into(),
            spans: Vec::new(),
        }
    }
}

/// One matching line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    /// 1-based line number
    pub line_number: u32,
    /// 1-based byte column of the first match on the line
    pub column: u32,
    pub content: String,
    pub spans: Vec<HighlightSpan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_before: Vec<ContextLine>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context_after: Vec<ContextLine>,
}

impl SearchMatch {
    pub fn new(line_number: u32, column: u32, content: impl Into<String>) -> Self {
        Self {
            line_number,
            column,
            content: content.into(),
            spans: Vec::new(),
            context_before: Vec::new(),
            context_after: Vec::new(),
        }
    }

    /// Replace the spans, keeping them sorted and non-overlapping.
    /// Spans reaching past the line are clipped to it.
    pub fn with_spans(mut self, spans: impl IntoIterator<Item = HighlightSpan>) -> Self {
        self.spans = normalize_spans(spans, self.content.len());
        self
    }

    /// Text covered by the first match span, if any
    pub fn matched_text(&self) -> Option<&str> {
        let span = self.spans.iter().find(|s| s.kind == SpanKind::Match)?;
        self.content.get(span.start..span.end?)
    }

    /// Approximate heap bytes held by context lines
    pub fn context_bytes(&self) -> usize {
        self.context_before
            .iter()
            .chain(&self.context_after)
            .map(|c| c.content.len())
            .sum()
    }
}

/// Sort spans by start, clip them to `line_len`, drop empty and overlapping ones
pub fn normalize_spans(
    spans: impl IntoIterator<Item = HighlightSpan>,
    line_len: usize,
) -> Vec<HighlightSpan> {
    let mut spans: Vec<HighlightSpan> = spans
        .into_iter()
        .map(|mut s| {
            let end = s.end.unwrap_or(line_len).min(line_len);
            s.start = s.start.min(line_len);
            s.close(end);
            s
        })
        .filter(|s| !s.is_empty())
        .collect();
    spans.sort_by_key(|s| s.start);

    let mut result: Vec<HighlightSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        let overlaps = result
            .last()
            .and_then(|prev| prev.end)
            .is_some_and(|prev_end| span.start < prev_end);
        if !overlaps {
            result.push(span);
        }
    }
    result
}

/// Size and type information recorded for a file with matches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub size: u64,
    /// Lowercased extension, when the file has one
    pub file_type: Option<String>,
}

impl FileMetadata {
    pub fn from_path(path: &Path) -> Option<Self> {
        let meta = std::fs::metadata(path).ok()?;
        Some(Self {
            size: meta.len(),
            file_type: path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase()),
        })
    }
}

/// All matches for one file, in arrival order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    path: PathBuf,
    match_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<FileMetadata>,
    matches: Vec<SearchMatch>,
}

impl FileResult {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            match_count: 0,
            metadata: None,
            matches: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn matches(&self) -> &[SearchMatch] {
        &self.matches
    }

    pub fn match_count(&self) -> usize {
        self.match_count
    }

    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: Option<FileMetadata>) {
        self.metadata = metadata;
    }

    pub fn push(&mut self, m: SearchMatch) {
        self.matches.push(m);
        self.match_count += 1;
    }

    /// Drop all context lines, returning the number of bytes released
    pub fn drop_context(&mut self) -> usize {
        let mut freed = 0;
        for m in &mut self.matches {
            freed += m.context_bytes();
            m.context_before = Vec::new();
            m.context_after = Vec::new();
        }
        freed
    }
}

/// Lifecycle state of a search run (and of the process backing it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Cancelled,
    Errored,
}

impl SearchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SearchStatus::Completed | SearchStatus::Cancelled | SearchStatus::Errored
        )
    }
}

impl std::fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SearchStatus::Idle => "idle",
            SearchStatus::Running => "running",
            SearchStatus::Completed => "completed",
            SearchStatus::Cancelled => "cancelled",
            SearchStatus::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// Aggregate state for one search run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSummary {
    pub pattern: String,
    pub total_matches: usize,
    pub files_with_matches: usize,
    pub files_scanned: u64,
    pub elapsed: Duration,
    pub status: SearchStatus,
    pub error: Option<String>,
    /// Output records dropped because they could not be decoded
    pub skipped_records: usize,
    pub resource_warnings: usize,
    /// Set when `max_results` stopped the search early
    pub truncated: bool,
}

impl SearchSummary {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            total_matches: 0,
            files_with_matches: 0,
            files_scanned: 0,
            elapsed: Duration::ZERO,
            status: SearchStatus::Idle,
            error: None,
            skipped_records: 0,
            resource_warnings: 0,
            truncated: false,
        }
    }
}
