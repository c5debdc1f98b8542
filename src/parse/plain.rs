//! Decoder for colored `path:line:column:content` output

use super::Record;
use super::ansi::strip_ansi;
use crate::search::types::{ContextLine, HighlightSpan, SearchMatch, SpanKind};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

fn match_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?s)(?P<path>.+?):(?P<line>[0-9]+):(?P<column>[0-9]+):(?P<content>.*)$")
            .expect("static regex is valid")
    })
}

fn context_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?s)(?P<path>.+?)-(?P<line>[0-9]+)-(?P<content>.*)$")
            .expect("static regex is valid")
    })
}

/// Decode one line. `current` is the file of the previous record; it
/// disambiguates paths that themselves contain `-N-` or `:N:N:`.
pub(super) fn decode(line: &[u8], current: Option<&Path>) -> Result<Record, String> {
    let raw = String::from_utf8_lossy(line);
    let stripped = strip_ansi(&raw, SpanKind::Match);
    let text = stripped.text.as_str();

    if text.is_empty() || text == "--" {
        return Ok(Record::Separator);
    }

    if let Some(current) = current.and_then(|p| p.to_str()) {
        if let Some(rest) = text.strip_prefix(current) {
            let offset = current.len() + 1;
            if let Some(rest) = rest.strip_prefix(':') {
                if let Some(record) = match_fields(rest) {
                    let (line, column, content_at) = record?;
                    return Ok(build_match(
                        PathBuf::from(current),
                        line,
                        column,
                        text,
                        offset + content_at,
                        &stripped.spans,
                    ));
                }
            } else if let Some(rest) = rest.strip_prefix('-') {
                if let Some(record) = context_fields(rest) {
                    let (line, content_at) = record?;
                    return Ok(build_context(
                        PathBuf::from(current),
                        line,
                        text,
                        offset + content_at,
                        &stripped.spans,
                    ));
                }
            }
        }
    }

    if let Some(caps) = match_line().captures(text) {
        let line = parse_number(&caps["line"], "line")?;
        let column = parse_number(&caps["column"], "column")?;
        let content_at = caps.name("content").map_or(text.len(), |m| m.start());
        return Ok(build_match(
            PathBuf::from(&caps["path"]),
            line,
            column,
            text,
            content_at,
            &stripped.spans,
        ));
    }

    if let Some(caps) = context_line().captures(text) {
        let line = parse_number(&caps["line"], "line")?;
        let content_at = caps.name("content").map_or(text.len(), |m| m.start());
        return Ok(build_context(
            PathBuf::from(&caps["path"]),
            line,
            text,
            content_at,
            &stripped.spans,
        ));
    }

    Err("line does not match path:line:column:content".to_string())
}

/// Parse `line:column:` at the start of `rest`.
/// Returns `None` when the shape does not fit, `Some(Err)` for bad numbers.
fn match_fields(rest: &str) -> Option<Result<(u32, u32, usize), String>> {
    let (line, after_line) = rest.split_once(':')?;
    let (column, _) = after_line.split_once(':')?;
    if !is_digits(line) || !is_digits(column) {
        return None;
    }
    let content_at = line.len() + 1 + column.len() + 1;
    Some(
        parse_number(line, "line")
            .and_then(|l| parse_number(column, "column").map(|c| (l, c, content_at))),
    )
}

fn context_fields(rest: &str) -> Option<Result<(u32, usize), String>> {
    let (line, _) = rest.split_once('-')?;
    if !is_digits(line) {
        return None;
    }
    Some(parse_number(line, "line").map(|l| (l, line.len() + 1)))
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

fn parse_number(s: &str, field: &str) -> Result<u32, String> {
    match s.parse::<u32>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("{} number `{}` is not a positive 32-bit integer", field, s)),
    }
}

/// Spans that fall within the content, shifted to content-relative offsets
fn content_spans(spans: &[HighlightSpan], content_at: usize, kind: SpanKind) -> Vec<HighlightSpan> {
    spans
        .iter()
        .filter_map(|s| {
            let end = s.end?;
            if end <= content_at {
                return None;
            }
            let start = s.start.max(content_at) - content_at;
            Some(HighlightSpan::closed(start, end - content_at, kind))
        })
        .collect()
}

fn build_match(
    path: PathBuf,
    line: u32,
    column: u32,
    text: &str,
    content_at: usize,
    spans: &[HighlightSpan],
) -> Record {
    let content = text.get(content_at..).unwrap_or_default();
    let m = SearchMatch::new(line, column, content)
        .with_spans(content_spans(spans, content_at, SpanKind::Match));
    Record::Match(path, m)
}

fn build_context(
    path: PathBuf,
    line: u32,
    text: &str,
    content_at: usize,
    spans: &[HighlightSpan],
) -> Record {
    let content = text.get(content_at..).unwrap_or_default();
    let mut ctx = ContextLine::new(line, content);
    ctx.spans = content_spans(spans, content_at, SpanKind::Context);
    Record::Context(path, ctx)
}
