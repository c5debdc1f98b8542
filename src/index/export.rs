//! Plain serializations of a [`ResultIndex`]
//!
//! Every export walks the index once; callers going through
//! [`SharedIndex`] get a single consistent snapshot under one read lock.

use super::{ResultIndex, SharedIndex};
use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

pub const CSV_HEADER: [&str; 4] = ["path", "line", "column", "content"];

/// One row of the tabular export
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRow {
    pub path: PathBuf,
    pub line_number: u32,
    pub column: u32,
    pub content: String,
}

/// `path:line:column:content`, one match per line
pub fn write_text<W: Write>(index: &ResultIndex, mut out: W) -> Result<()> {
    for file in index.all() {
        let path = file.path().display();
        for m in file.matches() {
            writeln!(out, "{}:{}:{}:{}", path, m.line_number, m.column, m.content)?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Comma separated with a header row. Fields containing separators,
/// quotes or line breaks are quoted.
pub fn write_csv<W: Write>(index: &ResultIndex, mut out: W) -> Result<()> {
    writeln!(out, "{}", CSV_HEADER.join(","))?;
    for file in index.all() {
        let path = file.path().to_string_lossy();
        for m in file.matches() {
            writeln!(
                out,
                "{},{},{},{}",
                csv_field(&path),
                m.line_number,
                m.column,
                csv_field(&m.content)
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

/// Files as nested records, matches (and context) inside each file
pub fn write_json<W: Write>(index: &ResultIndex, out: W) -> Result<()> {
    serde_json::to_writer_pretty(out, index.all())?;
    Ok(())
}

fn csv_field(value: &str) -> std::borrow::Cow<'_, str> {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\"")).into()
    } else {
        value.into()
    }
}

/// Read back the output of [`write_csv`]
pub fn parse_csv(input: &str) -> Result<Vec<MatchRow>> {
    let mut records = split_records(input)?.into_iter().enumerate();

    match records.next() {
        Some((_, header)) if header == CSV_HEADER => {}
        Some((_, header)) => {
            return Err(SearchError::Csv {
                record: 0,
                reason: format!("unexpected header {:?}", header),
            });
        }
        None => {
            return Err(SearchError::Csv {
                record: 0,
                reason: "missing header".to_string(),
            });
        }
    }

    records
        .map(|(record, fields)| {
            let [path, line, column, content]: [String; 4] =
                fields.try_into().map_err(|f: Vec<String>| SearchError::Csv {
                    record,
                    reason: format!("expected 4 fields, found {}", f.len()),
                })?;
            let number = |name: &str, value: &str| {
                value.parse::<u32>().map_err(|e| SearchError::Csv {
                    record,
                    reason: format!("bad {} `{}`: {}", name, value, e),
                })
            };
            Ok(MatchRow {
                path: PathBuf::from(path),
                line_number: number("line", &line)?,
                column: number("column", &column)?,
                content,
            })
        })
        .collect()
}

/// Split CSV text into records of unquoted fields
fn split_records(input: &str) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if quoted {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => quoted = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' if field.is_empty() => quoted = true,
            ',' => fields.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut fields));
            }
            _ => field.push(c),
        }
    }

    if quoted {
        return Err(SearchError::Csv {
            record: records.len(),
            reason: "unterminated quoted field".to_string(),
        });
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }
    Ok(records)
}

impl SharedIndex {
    pub fn export_text(&self) -> Result<String> {
        let mut buf = Vec::new();
        write_text(&self.read(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn export_csv(&self) -> Result<String> {
        let mut buf = Vec::new();
        write_csv(&self.read(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn export_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        write_json(&self.read(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
