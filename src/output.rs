//! ripgrep-style printing of indexed results

use crate::search::types::{FileResult, HighlightSpan, SpanKind};
use std::io::{self, Write};
use std::path::Path;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn stdout(color: bool) -> StandardStream {
    let choice = if color {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    };
    StandardStream::stdout(choice)
}

/// Print matches grouped by file, with context and highlighted spans
pub fn print_results(files: &[FileResult], color: bool, heading: bool) -> io::Result<()> {
    let mut out = stdout(color);
    write_results(&mut out, files, heading)
}

pub fn write_results<W: WriteColor>(out: &mut W, files: &[FileResult], heading: bool) -> io::Result<()> {
    for (i, file) in files.iter().enumerate() {
        if i > 0 && heading {
            // Blank line between files
            writeln!(out)?;
        }

        if heading {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)).set_bold(true))?;
            writeln!(out, "{}", file.path().display())?;
            out.reset()?;
        }

        let mut last_line: Option<u32> = None;
        for m in file.matches() {
            let first_line = m
                .context_before
                .first()
                .map_or(m.line_number, |c| c.line_number);

            // Context separator when lines were skipped
            let has_context = !m.context_before.is_empty() || !m.context_after.is_empty();
            if let Some(last) = last_line {
                if has_context && first_line > last + 1 {
                    out.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)))?;
                    writeln!(out, "--")?;
                    out.reset()?;
                }
            }

            for ctx in &m.context_before {
                if last_line.is_some_and(|last| ctx.line_number <= last) {
                    continue;
                }
                write_line(out, file.path(), ctx.line_number, '-', &ctx.content, &ctx.spans, heading)?;
            }

            write_line(out, file.path(), m.line_number, ':', &m.content, &m.spans, heading)?;

            for ctx in &m.context_after {
                write_line(out, file.path(), ctx.line_number, '-', &ctx.content, &ctx.spans, heading)?;
            }

            last_line = Some(m.context_after.last().map_or(m.line_number, |c| c.line_number));
        }
    }
    out.flush()
}

fn write_line<W: WriteColor>(
    out: &mut W,
    path: &Path,
    line_number: u32,
    separator: char,
    content: &str,
    spans: &[HighlightSpan],
    heading: bool,
) -> io::Result<()> {
    if !heading {
        // Path prefix when not using heading mode
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        write!(out, "{}", path.display())?;
        out.reset()?;
        write!(out, "{}", separator)?;
    }

    out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
    write!(out, "{}", line_number)?;
    out.reset()?;
    write!(out, "{}", separator)?;

    let mut pos = 0;
    for span in spans {
        let (Some(start), Some(end)) = (
            content.get(..span.start).map(str::len),
            span.end.filter(|&e| content.is_char_boundary(e) && e <= content.len()),
        ) else {
            continue;
        };
        if start < pos || end <= start {
            continue;
        }

        write!(out, "{}", &content[pos..start])?;
        let mut spec = ColorSpec::new();
        match span.kind {
            SpanKind::Match => spec.set_fg(Some(Color::Red)).set_bold(true),
            SpanKind::Context => spec.set_fg(Some(Color::Yellow)),
        };
        out.set_color(&spec)?;
        write!(out, "{}", &content[start..end])?;
        out.reset()?;
        pos = end;
    }
    writeln!(out, "{}", &content[pos..])
}

/// Print only filenames (for -l flag)
pub fn print_files_only(files: &[FileResult], color: bool) -> io::Result<()> {
    write_files_only(&mut stdout(color), files)
}

pub fn write_files_only<W: WriteColor>(out: &mut W, files: &[FileResult]) -> io::Result<()> {
    for file in files {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        writeln!(out, "{}", file.path().display())?;
        out.reset()?;
    }
    out.flush()
}

/// Print match count per file (for -c flag)
pub fn print_match_counts(files: &[FileResult], color: bool) -> io::Result<()> {
    write_match_counts(&mut stdout(color), files)
}

pub fn write_match_counts<W: WriteColor>(out: &mut W, files: &[FileResult]) -> io::Result<()> {
    let mut sorted: Vec<&FileResult> = files.iter().collect();
    sorted.sort_by(|a, b| a.path().cmp(b.path()));

    for file in sorted {
        out.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)))?;
        write!(out, "{}", file.path().display())?;
        out.reset()?;
        write!(out, ":")?;
        out.set_color(ColorSpec::new().set_fg(Some(Color::Green)))?;
        writeln!(out, "{}", file.match_count())?;
        out.reset()?;
    }
    out.flush()
}
