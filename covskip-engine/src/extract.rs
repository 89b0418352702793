// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extraction of dependency runs from source files.
//!
//! A *run* is a maximal contiguous interval of lines a test execution
//! depends on. Runs are seeded by executed-line indices and extended
//! through blank lines, so that edits confined to the whitespace between
//! or after executed statements still show up as a dependency change even
//! though coverage data never mentions those lines.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// One extracted dependency run: a half-open line interval plus its literal
/// text content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedRun {
    /// First line of the run (0-indexed).
    pub start: u32,
    /// One past the last line of the run.
    pub end: u32,
    /// The newline-joined text of every line in the run, without a trailing
    /// newline. A run that reaches end-of-file carries one synthetic empty
    /// trailing entry so that deleting lines at EOF changes the content.
    pub content: String,
}

/// A session-scoped cache of file contents, split into lines.
///
/// Both the record phase and the decide phase read source files through this
/// cache, so within one session every consumer sees a single stable snapshot
/// of each file. Unreadable files are remembered as unreadable and not
/// retried.
#[derive(Debug, Default)]
pub struct FileContentCache {
    files: HashMap<Utf8PathBuf, Option<Vec<String>>>,
}

impl FileContentCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lines of `file`, reading and caching them on first use.
    ///
    /// Returns `None` if the file could not be read (deleted, renamed,
    /// permission error). Callers must treat this as "cannot verify, assume
    /// changed"; it is never a hard error.
    pub fn lines(&mut self, file: &Utf8Path) -> Option<&[String]> {
        if !self.files.contains_key(file) {
            let lines = match std::fs::read_to_string(file) {
                Ok(content) => Some(content.lines().map(str::to_owned).collect()),
                Err(error) => {
                    debug!("failed to read `{file}`: {error}");
                    None
                }
            };
            self.files.insert(file.to_owned(), lines);
        }
        self.files[file].as_deref()
    }

    /// Reads and caches `file` if it hasn't been seen yet, discarding the
    /// result. Used to prefetch measured files before resolving coverage.
    pub fn prefetch(&mut self, file: &Utf8Path) {
        let _ = self.lines(file);
    }
}

/// Groups `interesting` line indices (0-indexed) in `file` into maximal
/// contiguous runs.
///
/// A line starts or extends the current run if it is interesting, or if a run
/// is already open and the line is blank (whitespace-only). A non-blank,
/// non-interesting line closes the run. A run still open at end-of-file is
/// emitted with `end = last_index + 1` and an extra empty content entry, so
/// trailing deletions are distinguishable from no change.
///
/// Returns `None` if the file cannot be read; this is a soft failure and the
/// caller must treat the file's runs as unverifiable.
pub fn extract_runs(
    cache: &mut FileContentCache,
    file: &Utf8Path,
    interesting: &BTreeSet<u32>,
) -> Option<Vec<ExtractedRun>> {
    let all_lines = cache.lines(file)?;

    let mut runs = Vec::new();
    let mut run_start = 0u32;
    let mut current: Vec<&str> = Vec::new();

    for (i, line) in all_lines.iter().enumerate() {
        let i = i as u32;
        if interesting.contains(&i) {
            if current.is_empty() {
                run_start = i;
            }
            current.push(line);
        } else if !current.is_empty() && line.trim().is_empty() {
            current.push(line);
        } else if !current.is_empty() {
            runs.push(ExtractedRun {
                start: run_start,
                end: i,
                content: current.join("\n"),
            });
            current.clear();
        }
    }

    // EOF sentinel: an open run absorbs the end of the file.
    if !current.is_empty() {
        current.push("");
        runs.push(ExtractedRun {
            start: run_start,
            end: all_lines.len() as u32,
            content: current.join("\n"),
        });
    }

    Some(runs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;
    use maplit::btreeset;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn write_file(dir: &Utf8TempDir, name: &str, content: &str) -> Utf8PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("writing test fixture succeeds");
        path
    }

    #[test]
    fn single_run_through_blank_lines_to_eof() {
        let dir = Utf8TempDir::new().unwrap();
        // Lines 0 and 1 are code, lines 2, 4 are executed, 3/5/6 blank.
        let path = write_file(
            &dir,
            "mod.rs",
            "fn covered() {\n    helper();\n    assert();\n\n    assert();\n\n\n",
        );
        let mut cache = FileContentCache::new();

        let runs = extract_runs(&mut cache, &path, &btreeset! {2, 4}).unwrap();
        assert_eq!(
            runs,
            vec![ExtractedRun {
                start: 2,
                end: 7,
                content: "    assert();\n\n    assert();\n\n\n".to_owned(),
            }]
        );
    }

    #[test]
    fn non_blank_line_closes_run() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_file(&dir, "two.rs", "a();\n\nb();\nc();\nd();\n");
        let mut cache = FileContentCache::new();

        let runs = extract_runs(&mut cache, &path, &btreeset! {0, 3}).unwrap();
        assert_eq!(
            runs,
            vec![
                ExtractedRun {
                    start: 0,
                    end: 2,
                    content: "a();\n".to_owned(),
                },
                ExtractedRun {
                    start: 3,
                    end: 4,
                    content: "c();".to_owned(),
                },
            ]
        );
    }

    #[test]
    fn run_at_eof_gets_sentinel_entry() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_file(&dir, "eof.rs", "a();\nb();\n");
        let mut cache = FileContentCache::new();

        let runs = extract_runs(&mut cache, &path, &btreeset! {1}).unwrap();
        // The trailing empty entry makes "b();\n" differ from a file where
        // more lines follow b();.
        assert_eq!(
            runs,
            vec![ExtractedRun {
                start: 1,
                end: 2,
                content: "b();\n".to_owned(),
            }]
        );
    }

    #[test]
    fn editing_trailing_blank_lines_changes_content() {
        let dir = Utf8TempDir::new().unwrap();
        let before = write_file(&dir, "before.rs", "a();\n\n\n");
        let after = write_file(&dir, "after.rs", "a();\n\n");
        let mut cache = FileContentCache::new();

        let before_runs = extract_runs(&mut cache, &before, &btreeset! {0}).unwrap();
        let after_runs = extract_runs(&mut cache, &after, &btreeset! {0}).unwrap();
        assert_ne!(before_runs[0].content, after_runs[0].content);
    }

    #[test]
    fn extraction_is_idempotent() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_file(&dir, "idem.rs", "a();\nb();\n\nc();\n");
        let lines = btreeset! {0, 1, 3};

        let mut cache1 = FileContentCache::new();
        let mut cache2 = FileContentCache::new();
        assert_eq!(
            extract_runs(&mut cache1, &path, &lines),
            extract_runs(&mut cache2, &path, &lines),
        );
    }

    #[test]
    fn unreadable_file_is_a_soft_failure() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("missing.rs");
        let mut cache = FileContentCache::new();

        assert_eq!(extract_runs(&mut cache, &path, &btreeset! {0}), None);
        // The unreadable result is cached, not retried.
        assert_eq!(cache.lines(&path), None);
    }

    #[test]
    fn no_interesting_lines_yields_no_runs() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_file(&dir, "none.rs", "a();\nb();\n");
        let mut cache = FileContentCache::new();

        let runs = extract_runs(&mut cache, &path, &BTreeSet::new()).unwrap();
        assert!(runs.is_empty());
    }

    // Blank lines extend an open run but never open one on their own.
    #[test_case("a();\n\nb();\n", &[0], (0, 2, "a();\n"); "trailing blank joins")]
    #[test_case("a();\n\nb();\n", &[2], (2, 3, "b();\n"); "leading blank ignored")]
    #[test_case("a();\n  \nb();\n", &[0], (0, 2, "a();\n  "); "whitespace-only counts as blank")]
    fn blank_line_handling(content: &str, interesting: &[u32], expected: (u32, u32, &str)) {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_file(&dir, "case.rs", content);
        let mut cache = FileContentCache::new();

        let runs = extract_runs(&mut cache, &path, &interesting.iter().copied().collect())
            .unwrap();
        let (start, end, expected_content) = expected;
        assert_eq!(
            runs,
            vec![ExtractedRun {
                start,
                end,
                content: expected_content.to_owned(),
            }]
        );
    }

    #[test]
    fn cache_snapshot_is_stable_across_rewrites() {
        let dir = Utf8TempDir::new().unwrap();
        let path = write_file(&dir, "stable.rs", "a();\n");
        let mut cache = FileContentCache::new();

        let first = extract_runs(&mut cache, &path, &btreeset! {0}).unwrap();
        std::fs::write(&path, "changed();\n").unwrap();
        let second = extract_runs(&mut cache, &path, &btreeset! {0}).unwrap();
        assert_eq!(first, second);
    }
}
