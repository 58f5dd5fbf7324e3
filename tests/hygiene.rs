//! Hygiene: enforces coding standards at test time
//!
//! These tests scan the production sources of the session core, the wire
//! codec, and the CLI for antipatterns. Each has a budget. If you must add
//! one, you have to fix an existing one first; the budget never grows.
#![allow(clippy::absurd_extreme_comparisons)]

use std::fs;
use std::path::Path;

// Panics: these crash the process.
const MAX_UNWRAP: usize = 0;
const MAX_EXPECT: usize = 0;
const MAX_PANIC: usize = 0;
const MAX_UNREACHABLE: usize = 0;
const MAX_TODO: usize = 0;
const MAX_UNIMPLEMENTED: usize = 0;

// Silent loss: discards errors without inspecting.
// Both are oneshot/mpsc sends whose receiver may be gone.
const MAX_SILENT_DISCARD: usize = 2;
// Env parsing fallbacks and lenient scalar parsing.
const MAX_DOT_OK: usize = 6;

// Style / structure.
const MAX_ALLOW_DEAD_CODE: usize = 0;

const SOURCE_DIRS: &[&str] = &["src", "wire/src", "cli/src"];

struct SourceFile {
    path: String,
    content: String,
}

/// Collect production `.rs` files, excluding test files.
fn source_files() -> Vec<SourceFile> {
    let root = Path::new(env!("CARGO_MANIFEST_DIR"));
    let mut files = Vec::new();
    for dir in SOURCE_DIRS {
        collect_rs_files(&root.join(dir), &mut files);
    }
    files
}

fn collect_rs_files(dir: &Path, out: &mut Vec<SourceFile>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_rs_files(&path, out);
        } else if path.extension().is_some_and(|e| e == "rs") {
            let path_str = path.to_string_lossy().to_string();
            // Skip test files
            if path_str.ends_with("_test.rs") {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                out.push(SourceFile { path: path_str, content });
            }
        }
    }
}

fn count_in_source(files: &[SourceFile], pattern: &str) -> Vec<(String, usize)> {
    files
        .iter()
        .filter_map(|file| {
            let count = file.content.lines().filter(|line| line.contains(pattern)).count();
            if count > 0 { Some((file.path.clone(), count)) } else { None }
        })
        .collect()
}

fn total(hits: &[(String, usize)]) -> usize {
    hits.iter().map(|(_, c)| c).sum()
}

fn format_hits(hits: &[(String, usize)]) -> String {
    hits.iter()
        .map(|(path, count)| format!("  {path}: {count}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn assert_budget(pattern: &str, max: usize) {
    let files = source_files();
    let hits = count_in_source(&files, pattern);
    let count = total(&hits);
    assert!(count <= max, "{pattern} budget exceeded: found {count}, max {max}.\n{}", format_hits(&hits));
}

#[test]
fn sources_are_found() {
    assert!(source_files().len() >= 10, "hygiene scan found too few files; wrong working directory?");
}

#[test]
fn unwrap_budget() {
    assert_budget(".unwrap()", MAX_UNWRAP);
}

#[test]
fn expect_budget() {
    assert_budget(".expect(", MAX_EXPECT);
}

#[test]
fn panic_budget() {
    assert_budget("panic!(", MAX_PANIC);
}

#[test]
fn unreachable_budget() {
    assert_budget("unreachable!(", MAX_UNREACHABLE);
}

#[test]
fn todo_budget() {
    assert_budget("todo!(", MAX_TODO);
}

#[test]
fn unimplemented_budget() {
    assert_budget("unimplemented!(", MAX_UNIMPLEMENTED);
}

#[test]
fn silent_discard_budget() {
    assert_budget("let _ =", MAX_SILENT_DISCARD);
}

#[test]
fn dot_ok_budget() {
    assert_budget(".ok()", MAX_DOT_OK);
}

#[test]
fn allow_dead_code_budget() {
    assert_budget("#[allow(dead_code)]", MAX_ALLOW_DEAD_CODE);
}
