//! Shared helpers for integration tests: fixture trees and stand-in
//! search tools written as shell scripts.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A directory with a few source files containing known matches
pub fn fixture_tree() -> TempDir {
    let dir = TempDir::new().expect("Failed to create fixture dir");
    fs::write(
        dir.path().join("main.rs"),
        "fn main() {\n    println!(\"Hello, world!\");\n    // TODO: fix this\n}\n",
    )
    .unwrap();
    fs::write(
        dir.path().join("lib.rs"),
        "pub fn add(a: i32, b: i32) -> i32 {\n    // TODO: overflow\n    a + b\n}\n",
    )
    .unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(
        dir.path().join("docs").join("notes.md"),
        "# Notes\n\nTODO: write docs\n",
    )
    .unwrap();
    dir
}

/// Write an executable script standing in for ripgrep
#[cfg(unix)]
pub fn fake_tool(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A fake tool that prints `output` verbatim and exits with `code`
#[cfg(unix)]
pub fn replaying_tool(dir: &Path, output: &str, code: i32) -> PathBuf {
    let data = dir.join("replay.out");
    fs::write(&data, output).unwrap();
    fake_tool(
        dir,
        "replay-rg",
        &format!("cat '{}'\nexit {}", data.display(), code),
    )
}

pub fn json_begin(path: &str) -> String {
    format!(r#"{{"type":"begin","data":{{"path":{{"text":"{}"}}}}}}"#, path)
}

pub fn json_end(path: &str) -> String {
    format!(
        r#"{{"type":"end","data":{{"path":{{"text":"{}"}},"binary_offset":null,"stats":{{}}}}}}"#,
        path
    )
}

/// A match record whose first occurrence of `needle` is highlighted
pub fn json_match(path: &str, line: u32, text: &str, needle: &str) -> String {
    let start = text.find(needle).unwrap_or(0);
    let end = start + needle.len();
    format!(
        r#"{{"type":"match","data":{{"path":{{"text":"{}"}},"lines":{{"text":"{}\n"}},"line_number":{},"absolute_offset":0,"submatches":[{{"match":{{"text":"{}"}},"start":{},"end":{}}}]}}}}"#,
        path, text, line, needle, start, end
    )
}

pub fn json_summary(searches: u64, with_match: u64, matches: u64) -> String {
    format!(
        r#"{{"data":{{"elapsed_total":{{"human":"0.001s","nanos":1000000,"secs":0}},"stats":{{"matches":{},"searches":{},"searches_with_match":{}}}}},"type":"summary"}}"#,
        matches, searches, with_match
    )
}

/// JSON output for `files` files with `per_file` matches each
pub fn json_run(files: usize, per_file: u32) -> String {
    let mut out = String::new();
    for f in 0..files {
        let path = format!("dir/file{}.txt", f);
        out.push_str(&json_begin(&path));
        out.push('\n');
        for line in 1..=per_file {
            out.push_str(&json_match(&path, line, "a needle here", "needle"));
            out.push('\n');
        }
        out.push_str(&json_end(&path));
        out.push('\n');
    }
    let total = files as u64 * per_file as u64;
    out.push_str(&json_summary(files as u64, files as u64, total));
    out.push('\n');
    out
}
