// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-test coverage input.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{BTreeMap, BTreeSet};

/// The executed-line sets one test produced, per file.
///
/// Line numbers are 1-indexed, as reported by coverage instrumentation; the
/// engine converts to 0-indexed internally. The host builds one of these per
/// test execution and hands it to [`Engine::record`](crate::Engine::record).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CoverageData {
    files: BTreeMap<Utf8PathBuf, BTreeSet<u32>>,
}

impl CoverageData {
    /// Creates empty coverage data.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds executed lines (1-indexed) for `file`. A file may be added to
    /// incrementally; lines accumulate as a set.
    pub fn add_lines(&mut self, file: impl Into<Utf8PathBuf>, lines: impl IntoIterator<Item = u32>) {
        self.files.entry(file.into()).or_default().extend(lines);
    }

    /// Iterates over the measured files in path order.
    pub fn measured_files(&self) -> impl Iterator<Item = &Utf8Path> {
        self.files.keys().map(Utf8PathBuf::as_path)
    }

    /// Returns the executed lines (1-indexed) for `file`, if it was measured.
    pub fn lines(&self, file: &Utf8Path) -> Option<&BTreeSet<u32>> {
        self.files.get(file)
    }

    /// Iterates over `(file, executed lines)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Utf8Path, &BTreeSet<u32>)> {
        self.files
            .iter()
            .map(|(file, lines)| (file.as_path(), lines))
    }

    /// Returns true if no files were measured.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}
