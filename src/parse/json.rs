//! Decoder for `rg --json` messages

use super::{Record, ToolStats};
use crate::search::types::{ContextLine, HighlightSpan, SearchMatch, SpanKind};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
enum Message {
    Begin(PathMessage),
    End(PathMessage),
    Match(LineMessage),
    Context(LineMessage),
    Summary(SummaryMessage),
}

/// Either UTF-8 text or base64 bytes for data that is not valid UTF-8
#[derive(Deserialize)]
struct Data {
    text: Option<String>,
    bytes: Option<String>,
}

impl Data {
    fn decode(self) -> Result<String, String> {
        self.decode_lossy().map(|lossy| lossy.text)
    }

    /// Decode, keeping the raw bytes when they had to be repaired
    fn decode_lossy(self) -> Result<Lossy, String> {
        match (self.text, self.bytes) {
            (Some(text), _) => Ok(Lossy { text, raw: None }),
            (None, Some(bytes)) => {
                let raw = STANDARD
                    .decode(bytes.as_bytes())
                    .map_err(|e| format!("invalid base64 payload: {}", e))?;
                Ok(match String::from_utf8(raw) {
                    Ok(text) => Lossy { text, raw: None },
                    Err(e) => {
                        let raw = e.into_bytes();
                        let text = String::from_utf8_lossy(&raw).into_owned();
                        Lossy { text, raw: Some(raw) }
                    }
                })
            }
            (None, None) => Err("data has neither text nor bytes".to_string()),
        }
    }
}

/// Text decoded from a payload. `raw` is set when invalid UTF-8 was
/// replaced, since tool offsets then refer to the raw bytes.
struct Lossy {
    text: String,
    raw: Option<Vec<u8>>,
}

impl Lossy {
    /// Map a byte offset into the raw payload to an offset into `text`
    fn offset(&self, offset: usize) -> usize {
        match &self.raw {
            Some(raw) => lossy_offset(raw, offset),
            None => offset,
        }
    }
}

/// Every invalid sequence becomes one U+FFFD. An offset inside such a
/// sequence maps to the start of its replacement.
fn lossy_offset(raw: &[u8], offset: usize) -> usize {
    let mut raw_pos = 0;
    let mut text_pos = 0;
    for chunk in raw.utf8_chunks() {
        let valid = chunk.valid().len();
        if offset <= raw_pos + valid {
            return text_pos + (offset - raw_pos);
        }
        raw_pos += valid;
        text_pos += valid;

        let invalid = chunk.invalid().len();
        if invalid == 0 {
            continue;
        }
        if offset < raw_pos + invalid {
            return text_pos;
        }
        raw_pos += invalid;
        text_pos += char::REPLACEMENT_CHARACTER.len_utf8();
    }
    text_pos + offset.saturating_sub(raw_pos)
}

#[derive(Deserialize)]
struct PathMessage {
    path: Data,
}

#[derive(Deserialize)]
struct LineMessage {
    path: Data,
    lines: Data,
    line_number: Option<u64>,
    #[serde(default)]
    submatches: Vec<Submatch>,
}

#[derive(Deserialize)]
struct Submatch {
    start: usize,
    end: usize,
}

#[derive(Deserialize)]
struct SummaryMessage {
    elapsed_total: Option<Elapsed>,
    #[serde(default)]
    stats: Stats,
}

#[derive(Deserialize)]
struct Elapsed {
    secs: u64,
    nanos: u32,
}

#[derive(Deserialize, Default)]
struct Stats {
    #[serde(default)]
    searches: u64,
    #[serde(default)]
    searches_with_match: u64,
    #[serde(default)]
    matches: u64,
}

pub(super) fn decode(line: &[u8]) -> Result<Record, String> {
    let message: Message =
        serde_json::from_slice(line).map_err(|e| format!("invalid JSON record: {}", e))?;

    match message {
        Message::Begin(m) => Ok(Record::Begin(PathBuf::from(m.path.decode()?))),
        Message::End(m) => Ok(Record::End(PathBuf::from(m.path.decode()?))),
        Message::Match(m) => {
            let path = PathBuf::from(m.path.decode()?);
            let line_number = line_number(m.line_number)?;
            let lines = m.lines.decode_lossy()?;
            let spans: Vec<HighlightSpan> = m
                .submatches
                .iter()
                .map(|s| {
                    HighlightSpan::closed(lines.offset(s.start), lines.offset(s.end), SpanKind::Match)
                })
                .collect();

            let column = match spans.first() {
                Some(first) => u32::try_from(first.start + 1)
                    .map_err(|_| format!("column {} out of range", first.start + 1))?,
                None => 1,
            };
            let content = trim_line_ending(lines.text);

            Ok(Record::Match(
                path,
                SearchMatch::new(line_number, column, content).with_spans(spans),
            ))
        }
        Message::Context(m) => {
            let path = PathBuf::from(m.path.decode()?);
            let line_number = line_number(m.line_number)?;
            let content = trim_line_ending(m.lines.decode()?);
            Ok(Record::Context(path, ContextLine::new(line_number, content)))
        }
        Message::Summary(m) => Ok(Record::Summary(ToolStats {
            files_scanned: m.stats.searches,
            files_with_matches: m.stats.searches_with_match,
            matches: m.stats.matches,
            elapsed: m
                .elapsed_total
                .map(|e| Duration::new(e.secs, e.nanos.min(999_999_999))),
        })),
    }
}

fn line_number(raw: Option<u64>) -> Result<u32, String> {
    let raw = raw.ok_or_else(|| "record has no line number".to_string())?;
    match u32::try_from(raw) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("line number {} out of range", raw)),
    }
}

fn trim_line_ending(mut text: String) -> String {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
    text
}
