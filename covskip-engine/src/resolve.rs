// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resolution of raw coverage data against the record store.
//!
//! Resolution is the first of two tiers: executed lines that fall at the
//! start of (or inside) an already-recorded run reuse that run's key, and
//! only the leftover "unexplained" lines are extracted from file content and
//! recorded as new runs. Repeated sessions over a stable codebase therefore
//! never re-read or re-hash content that is already known.

use crate::{
    coverage::CoverageData,
    store::{RecordKey, RecordStore},
};
use camino::Utf8PathBuf;
use std::collections::{BTreeMap, BTreeSet};

/// The result of resolving one test's coverage against the record store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedCoverage {
    /// Keys of existing runs that explain part of the coverage, in
    /// first-resolved order.
    pub reused: Vec<RecordKey>,
    /// Per-file executed lines (0-indexed, sorted) not explained by any
    /// existing run; these must be extracted and recorded.
    pub unexplained: BTreeMap<Utf8PathBuf, BTreeSet<u32>>,
}

/// Splits `coverage` into runs already known to `store` and lines that still
/// need extraction.
///
/// Walks each file's executed lines in ascending order, tracking the end of
/// the currently-active known run: a line that exactly matches a recorded
/// run's start reuses its key and activates it; lines strictly before the
/// active end are already covered; everything else is unexplained. Interning
/// of filenames happens here, so the store is mutated even when nothing new
/// is recorded.
pub fn resolve_coverage(coverage: &CoverageData, store: &mut RecordStore) -> ResolvedCoverage {
    let mut resolved = ResolvedCoverage::default();

    for (file, lines) in coverage.iter() {
        let file_index = store.filename_index(file);
        let mut unexplained = BTreeSet::new();

        // Instrumentation reports 1-indexed lines; everything internal is
        // 0-indexed.
        let mut active_end: Option<u32> = None;
        for line in lines.iter().map(|line| line.saturating_sub(1)) {
            if active_end.is_some_and(|end| line >= end) {
                active_end = None;
            }

            if active_end.is_none() {
                match store.match_record(file_index, line) {
                    Some((key, record)) => {
                        resolved.reused.push(key);
                        active_end = Some(record.end);
                    }
                    None => {
                        unexplained.insert(line);
                    }
                }
            }
        }

        if !unexplained.is_empty() {
            resolved.unexplained.insert(file.to_owned(), unexplained);
        }
    }

    resolved
}
