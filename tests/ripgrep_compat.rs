//! Integration tests comparing the rgstream CLI to ripgrep itself.
//!
//! Both tools run over the same fixture tree; rgstream drives ripgrep in
//! JSON mode, so the files, counts and match lines it reports should agree
//! with plain `rg` output. Tests return early when `rg` is not installed.

mod common;

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Command;

fn rg_available() -> bool {
    Command::new("rg")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn rgstream_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_rgstream"))
}

/// Run `rgstream search` with given args, returns (stdout, stderr, exit code)
fn run_rgstream(args: &[&str], dir: &Path) -> (String, String, i32) {
    let output = Command::new(rgstream_binary())
        .arg("search")
        .args(args)
        .arg("--no-color")
        .current_dir(dir)
        .env_remove("RGSTREAM_RG_PATH")
        .env_remove("RGSTREAM_FORMAT")
        .env_remove("RGSTREAM_MAX_RESULTS")
        .output()
        .expect("Failed to run rgstream");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Run ripgrep with given args
fn run_rg(args: &[&str], dir: &Path) -> (String, String, i32) {
    let output = Command::new("rg")
        .args(args)
        .args(["--color=never", "--no-heading", "--no-config"])
        .current_dir(dir)
        .output()
        .expect("Failed to run ripgrep");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// File names from `-l` output
fn extract_files(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(file_name)
        .collect()
}

/// file name -> count from `-c` output
fn extract_counts(output: &str) -> BTreeMap<String, usize> {
    output
        .lines()
        .filter_map(|l| {
            let (file, count) = l.rsplit_once(':')?;
            Some((file_name(file), count.trim().parse().ok()?))
        })
        .collect()
}

/// (file name, line number, content) from `path:line:content` output
fn extract_lines(output: &str) -> HashSet<(String, u32, String)> {
    output
        .lines()
        .filter(|l| !l.is_empty() && *l != "--")
        .filter_map(|l| {
            let (file, rest) = l.split_once(':')?;
            let (line, content) = rest.split_once(':')?;
            Some((file_name(file), line.parse().ok()?, content.to_string()))
        })
        .collect()
}

#[test]
fn test_files_with_matches_agree() {
    if !rg_available() {
        return;
    }
    let dir = common::fixture_tree();

    let (ours, _, code) = run_rgstream(&["-l", "TODO", "."], dir.path());
    let (theirs, _, rg_code) = run_rg(&["-l", "TODO", "."], dir.path());

    assert_eq!(code, 0);
    assert_eq!(rg_code, 0);
    assert_eq!(extract_files(&ours), extract_files(&theirs));
    assert_eq!(extract_files(&ours).len(), 3);
}

#[test]
fn test_counts_agree() {
    if !rg_available() {
        return;
    }
    let dir = common::fixture_tree();

    let (ours, _, _) = run_rgstream(&["-c", "-i", "todo", "."], dir.path());
    let (theirs, _, _) = run_rg(&["-c", "-i", "todo", "."], dir.path());

    assert_eq!(extract_counts(&ours), extract_counts(&theirs));
}

#[test]
fn test_match_lines_agree() {
    if !rg_available() {
        return;
    }
    let dir = common::fixture_tree();

    let (ours, _, _) = run_rgstream(&["-w", "fn", "."], dir.path());
    let (theirs, _, _) = run_rg(&["-n", "-w", "fn", "."], dir.path());

    let ours = extract_lines(&ours);
    assert!(!ours.is_empty());
    assert_eq!(ours, extract_lines(&theirs));
}

#[test]
fn test_fixed_strings() {
    if !rg_available() {
        return;
    }
    let dir = common::fixture_tree();

    let (ours, _, code) = run_rgstream(&["-F", "a + b", "."], dir.path());
    assert_eq!(code, 0);
    let lines = extract_lines(&ours);
    assert_eq!(lines.len(), 1);
    assert!(lines.contains(&("lib.rs".to_string(), 3, "    a + b".to_string())));
}

#[test]
fn test_no_match_exit_code() {
    if !rg_available() {
        return;
    }
    let dir = common::fixture_tree();

    let (ours, _, code) = run_rgstream(&["zzz_not_present_zzz", "."], dir.path());
    let (_, _, rg_code) = run_rg(&["zzz_not_present_zzz", "."], dir.path());

    assert!(ours.is_empty());
    assert_eq!(code, 1);
    assert_eq!(rg_code, 1);
}

#[test]
fn test_json_export_lists_every_file() {
    if !rg_available() {
        return;
    }
    let dir = common::fixture_tree();

    let (ours, _, code) = run_rgstream(&["--export", "json", "TODO", "."], dir.path());
    assert_eq!(code, 0);

    let value: serde_json::Value = serde_json::from_str(&ours).unwrap();
    let files = value.as_array().unwrap();
    assert_eq!(files.len(), 3);
}

#[test]
fn test_invalid_pattern_is_an_error() {
    let dir = common::fixture_tree();

    let (ours, err, code) = run_rgstream(&["", "."], dir.path());
    assert!(ours.is_empty());
    assert_eq!(code, 2);
    assert!(err.contains("rgstream:"));
}

#[test]
fn test_missing_root_is_an_error() {
    let dir = common::fixture_tree();

    let (_, err, code) = run_rgstream(&["TODO", "no/such/dir"], dir.path());
    assert_eq!(code, 2);
    assert!(err.contains("no/such/dir"));
}
