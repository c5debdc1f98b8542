//! End-to-end sessions against stand-in search tools.
//!
//! Each test writes a small shell script that behaves like ripgrep for one
//! situation (dense output, failure, slow output, no JSON support) and
//! runs a full session against it.

#![cfg(unix)]

mod common;

use common::*;
use rgstream::aggregate::SyntheticMemory;
use rgstream::{EngineConfig, SearchEngine, SearchEvent, SearchStatus, SearchSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn engine_for(tool: &Path) -> SearchEngine {
    SearchEngine::new(EngineConfig {
        executable: tool.to_string_lossy().into_owned(),
        ..EngineConfig::default()
    })
}

/// Drain events until `Finished`
fn collect_events(session: &rgstream::SearchSession) -> Vec<SearchEvent> {
    let mut events = Vec::new();
    for event in session.events() {
        let done = matches!(event, SearchEvent::Finished(_));
        events.push(event);
        if done {
            break;
        }
    }
    events
}

fn batch_count(events: &[SearchEvent]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, SearchEvent::Batch(_)))
        .count()
}

/// Prints a match every 10ms for a long time
fn slow_tool(dir: &Path) -> PathBuf {
    let line = json_match("slow.txt", 1, "needle", "needle");
    fake_tool(
        dir,
        "slow-rg",
        &format!(
            "i=0\nwhile [ $i -lt 100000 ]; do\n  printf '%s\\n' '{}'\n  i=$((i+1))\n  sleep 0.01\ndone",
            line
        ),
    )
}

#[test]
fn test_three_files_one_match_each() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = replaying_tool(tools.path(), &json_run(3, 1), 0);
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let summary = session.wait();

    assert_eq!(summary.status, SearchStatus::Completed);
    assert_eq!(summary.total_matches, 3);
    assert_eq!(summary.files_with_matches, 3);
    assert_eq!(summary.files_scanned, 3);
    assert!(summary.error.is_none());

    let files = session.index().snapshot();
    let paths: Vec<PathBuf> = files.iter().map(|f| f.path().to_path_buf()).collect();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("dir/file0.txt"),
            PathBuf::from("dir/file1.txt"),
            PathBuf::from("dir/file2.txt"),
        ]
    );
    for file in &files {
        assert_eq!(file.match_count(), 1);
        assert_eq!(file.matches()[0].matched_text(), Some("needle"));
        assert_eq!(file.matches()[0].column, 3);
    }
}

#[test]
fn test_dense_results_flush_in_batches() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = replaying_tool(tools.path(), &json_run(50, 200), 0);
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let events = collect_events(session);
    let summary = session.wait();

    assert!(batch_count(&events) >= 500, "only {} batches", batch_count(&events));
    let delivered: usize = events
        .iter()
        .map(|e| match e {
            SearchEvent::Batch(b) => b.len(),
            _ => 0,
        })
        .sum();
    assert_eq!(delivered, 10_000);
    assert_eq!(summary.total_matches, 10_000);
    assert_eq!(summary.files_with_matches, 50);
    assert_eq!(session.index().total_matches(), 10_000);
    assert!(!summary.truncated);
    assert!(matches!(events.last(), Some(SearchEvent::Finished(s)) if *s == summary));
}

#[test]
fn test_undrained_events_hold_no_match_copies() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = replaying_tool(tools.path(), &json_run(50, 200), 0);
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let summary = session.wait();
    assert_eq!(summary.total_matches, 10_000);

    let batches: Vec<_> = session
        .events()
        .try_iter()
        .filter_map(|e| match e {
            SearchEvent::Batch(b) => Some(b),
            _ => None,
        })
        .collect();
    let ranges: usize = batches.iter().map(|b| b.ranges.len()).sum();
    assert!(ranges <= batches.len() + 50, "{} ranges queued", ranges);

    // Batches still resolve to every match through the index
    let resolved: usize = batches
        .iter()
        .map(|b| session.index().batch_entries(b).len())
        .sum();
    assert_eq!(resolved, 10_000);
}

#[test]
fn test_zero_matches_is_completed() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = replaying_tool(tools.path(), &format!("{}\n", json_summary(4, 0, 0)), 1);
    let mut engine = engine_for(&tool);

    let summary = engine
        .start(engine.config().parameters("absent", root.path()))
        .unwrap()
        .wait();

    assert_eq!(summary.status, SearchStatus::Completed);
    assert_eq!(summary.total_matches, 0);
    assert_eq!(summary.files_scanned, 4);
    assert!(summary.error.is_none());
}

#[test]
fn test_tool_failure_keeps_partial_results() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let data = tools.path().join("partial.out");
    std::fs::write(
        &data,
        format!("{}\n", json_match("ok.txt", 2, "found needle", "needle")),
    )
    .unwrap();
    let tool = fake_tool(
        tools.path(),
        "failing-rg",
        &format!(
            "cat '{}'\necho 'rg: ./secret: Permission denied (os error 13)' >&2\nexit 2",
            data.display()
        ),
    );
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let summary = session.wait();

    assert_eq!(summary.status, SearchStatus::Errored);
    assert!(summary.error.as_deref().unwrap().contains("Permission denied"));
    assert_eq!(summary.total_matches, 1);
    assert!(session.index().get(Path::new("ok.txt")).is_some());
}

#[test]
fn test_malformed_records_are_skipped_and_counted() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let output = [
        json_match("a.txt", 1, "needle one", "needle"),
        "{\"type\":\"match\",".to_string(),
        json_match("a.txt", 2, "needle two", "needle"),
        "this is not json".to_string(),
        r#"{"type":"match","data":{"path":{"text":"a.txt"},"lines":{"text":"x"},"line_number":-4,"submatches":[]}}"#.to_string(),
        json_match("b.txt", 9, "needle three", "needle"),
        json_summary(2, 2, 3),
    ]
    .join("\n");
    let tool = replaying_tool(tools.path(), &output, 0);
    let mut engine = engine_for(&tool);

    let summary = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap()
        .wait();

    assert_eq!(summary.status, SearchStatus::Completed);
    assert_eq!(summary.skipped_records, 3);
    assert_eq!(summary.total_matches, 3);
}

#[test]
fn test_cancel_stops_search_promptly() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = slow_tool(tools.path());
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    thread::sleep(Duration::from_millis(50));

    let cancelled_at = Instant::now();
    assert!(session.cancel());
    let summary = session.wait();
    assert!(cancelled_at.elapsed() < Duration::from_secs(5));

    assert_eq!(summary.status, SearchStatus::Cancelled);
    let settled = session.index().total_matches();
    assert_eq!(settled, summary.total_matches);

    thread::sleep(Duration::from_millis(100));
    assert_eq!(session.index().total_matches(), settled);
}

#[test]
fn test_cancel_is_idempotent() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = slow_tool(tools.path());
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    assert!(session.cancel());
    assert!(!session.cancel());
    assert!(!engine.cancel());

    let first = engine.active().unwrap().wait();
    let second = engine.active().unwrap().wait();
    assert_eq!(first, second);
    assert_eq!(first.status, SearchStatus::Cancelled);
    assert!(!engine.cancel());
    assert_eq!(engine.active().unwrap().status(), SearchStatus::Cancelled);
}

#[test]
fn test_memory_pressure_warns_once_and_completes() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = replaying_tool(tools.path(), &json_run(10, 20), 0);
    let config = EngineConfig {
        executable: tool.to_string_lossy().into_owned(),
        batch_size: 10,
        memory_ceiling_mb: 100,
        ..EngineConfig::default()
    };
    let gauge = SyntheticMemory::new(400 * 1024 * 1024);
    let mut engine = SearchEngine::new(config).with_memory_gauge(Arc::new(gauge));

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let events = collect_events(session);
    let summary = session.wait();

    let warnings = events
        .iter()
        .filter(|e| matches!(e, SearchEvent::ResourceWarning(_)))
        .count();
    assert_eq!(warnings, 1);
    assert_eq!(summary.resource_warnings, 1);
    assert_eq!(summary.status, SearchStatus::Completed);
    assert_eq!(summary.total_matches, 200);
}

#[test]
fn test_plain_fallback_when_json_is_unsupported() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let data = tools.path().join("plain.out");
    std::fs::write(
        &data,
        "src/a.rs:3:8:    // \x1b[0m\x1b[1m\x1b[31mneedle\x1b[0m here\n\
         src/b.rs:1:1:\x1b[0m\x1b[1m\x1b[31mneedle\x1b[0m\n",
    )
    .unwrap();
    let tool = fake_tool(
        tools.path(),
        "old-rg",
        &format!(
            "case \"$*\" in\n  *--json*) echo 'error: Found argument --json which was not expected' >&2; exit 2;;\nesac\ncat '{}'",
            data.display()
        ),
    );
    let mut engine = engine_for(&tool);

    let session = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let summary = session.wait();

    assert_eq!(summary.status, SearchStatus::Completed);
    assert_eq!(summary.total_matches, 2);
    let a = session.index().get(Path::new("src/a.rs")).unwrap();
    assert_eq!(a.matches()[0].content, "    // needle here");
    assert_eq!(a.matches()[0].matched_text(), Some("needle"));
    assert_eq!(a.matches()[0].column, 8);
}

#[test]
fn test_max_results_truncates_and_completes() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = replaying_tool(tools.path(), &json_run(2, 10), 0);
    let mut engine = engine_for(&tool);

    let params = engine
        .config()
        .parameters("needle", root.path())
        .with_max_results(5);
    let summary: SearchSummary = engine.start(params).unwrap().wait();

    assert_eq!(summary.status, SearchStatus::Completed);
    assert!(summary.truncated);
    assert_eq!(summary.total_matches, 5);
}

#[test]
fn test_new_search_replaces_active_one() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let tool = slow_tool(tools.path());
    let mut engine = engine_for(&tool);

    let first = engine
        .start(engine.config().parameters("needle", root.path()))
        .unwrap();
    let first_index = first.index().clone();
    let first_cancel = first.cancel_token();
    thread::sleep(Duration::from_millis(30));

    engine
        .start(engine.config().parameters("other", root.path()))
        .unwrap();
    assert!(first_cancel.is_cancelled());
    let frozen = first_index.total_matches();
    thread::sleep(Duration::from_millis(60));
    assert_eq!(first_index.total_matches(), frozen);

    let active = engine.active().unwrap();
    assert_eq!(active.params().pattern, "other");
    assert_eq!(active.status(), SearchStatus::Running);

    engine.cancel();
    assert_eq!(engine.finish_active().unwrap().status, SearchStatus::Cancelled);
    assert!(engine.active().is_none());
}

#[test]
fn test_file_size_is_current_after_edit() {
    let tools = TempDir::new().unwrap();
    let root = fixture_tree();
    let file = root.path().join("edited.txt");
    std::fs::write(&file, "a needle here\n").unwrap();
    let path = file.to_string_lossy().into_owned();
    let output = format!(
        "{}\n{}\n",
        json_match(&path, 1, "a needle here", "needle"),
        json_summary(1, 1, 1)
    );
    let tool = replaying_tool(tools.path(), &output, 0);
    let mut engine = engine_for(&tool);

    let size_after_search = |engine: &mut SearchEngine| {
        let session = engine
            .start(engine.config().parameters("needle", root.path()))
            .unwrap();
        assert_eq!(session.wait().status, SearchStatus::Completed);
        session.index().get(&file).unwrap().metadata().unwrap().size
    };

    assert_eq!(size_after_search(&mut engine), 14);
    std::fs::write(&file, "a needle here\nand a second needle\n").unwrap();
    assert_eq!(size_after_search(&mut engine), 34);
}
