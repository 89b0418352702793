// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The deduplicated, append-only store of recorded dependency runs.
//!
//! Every run a test depends on is recorded here exactly once, addressed by a
//! small stable [`RecordKey`]. Test fingerprints are lists of keys, so tests
//! sharing code share storage, and fingerprint comparison never needs the run
//! content itself, only its checksum.

use crate::errors::StoreConsistencyError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt};
use xxhash_rust::xxh3::xxh3_64;

/// A stable key identifying one recorded run, assigned in first-seen order.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RecordKey(u32);

impl RecordKey {
    /// Creates a new `RecordKey`.
    pub const fn new(key: u32) -> Self {
        Self(key)
    }

    pub(crate) fn in_range(self, len: usize) -> bool {
        (self.0 as usize) < len
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An interned filename, assigned in first-seen order.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileIndex(u32);

impl FileIndex {
    /// Creates a new `FileIndex`.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }
}

impl fmt::Display for FileIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The checksum of a run's text content.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RunChecksum(u64);

impl fmt::Display for RunChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Computes the checksum of a run's content.
///
/// NOTE: this is fixed to xxh3_64 for the lifetime of the current state
/// format version; changing it requires bumping
/// [`STATE_FORMAT_VERSION`](crate::format::STATE_FORMAT_VERSION).
pub fn run_checksum(content: &str) -> RunChecksum {
    RunChecksum(xxh3_64(content.as_bytes()))
}

/// One recorded dependency run. Immutable once stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunRecord {
    /// The file this run belongs to.
    pub file: FileIndex,
    /// First line of the run (0-indexed).
    pub start: u32,
    /// One past the last line of the run.
    pub end: u32,
    /// Checksum of the run's content.
    pub checksum: RunChecksum,
}

/// The store of recorded runs: an interned filename table, an append-only
/// list of [`RunRecord`]s, and a `(file, start)` index.
///
/// The store only grows; staleness is handled by the decide phase's
/// verification, not by pruning.
#[derive(Debug, Default)]
pub struct RecordStore {
    filenames: Vec<Utf8PathBuf>,
    filename_indices: HashMap<Utf8PathBuf, FileIndex>,
    records: Vec<RunRecord>,
    position_indices: HashMap<(FileIndex, u32), RecordKey>,
}

impl RecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `file`, creating an entry on first use.
    pub fn filename_index(&mut self, file: &Utf8Path) -> FileIndex {
        if let Some(&index) = self.filename_indices.get(file) {
            return index;
        }
        let index = FileIndex(self.filenames.len() as u32);
        self.filenames.push(file.to_owned());
        self.filename_indices.insert(file.to_owned(), index);
        index
    }

    /// Returns the filename interned at `index`, if any.
    pub fn filename(&self, index: FileIndex) -> Option<&Utf8Path> {
        self.filenames
            .get(index.0 as usize)
            .map(Utf8PathBuf::as_path)
    }

    /// Records a run, returning its key.
    ///
    /// If `(file, start)` has been seen before, the stored record must carry
    /// the same end line and content checksum; a mismatch means the same
    /// start line produced two different runs within one session, which is a
    /// fatal internal-consistency violation.
    pub fn save_record(
        &mut self,
        file: FileIndex,
        start: u32,
        end: u32,
        content: &str,
    ) -> Result<RecordKey, StoreConsistencyError> {
        let checksum = run_checksum(content);

        if let Some(&key) = self.position_indices.get(&(file, start)) {
            let existing = self.records[key.0 as usize];
            if existing.end != end || existing.checksum != checksum {
                let filename = self
                    .filename(file)
                    .map(Utf8Path::to_owned)
                    .unwrap_or_default();
                return Err(StoreConsistencyError::new(
                    filename,
                    start,
                    existing.end,
                    existing.checksum,
                    end,
                    checksum,
                ));
            }
            return Ok(key);
        }

        let key = RecordKey(self.records.len() as u32);
        self.records.push(RunRecord {
            file,
            start,
            end,
            checksum,
        });
        self.position_indices.insert((file, start), key);
        Ok(key)
    }

    /// Looks up the run starting at `(file, start)`, without mutating the
    /// store.
    pub fn match_record(&self, file: FileIndex, start: u32) -> Option<(RecordKey, RunRecord)> {
        let &key = self.position_indices.get(&(file, start))?;
        Some((key, self.records[key.0 as usize]))
    }

    /// Returns the run recorded under `key`.
    pub fn lookup(&self, key: RecordKey) -> Option<RunRecord> {
        self.records.get(key.0 as usize).copied()
    }

    /// Returns the number of recorded runs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no runs have been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn filenames(&self) -> &[Utf8PathBuf] {
        &self.filenames
    }

    pub(crate) fn records(&self) -> &[RunRecord] {
        &self.records
    }

    /// Rebuilds a store from persisted filenames and records.
    ///
    /// Returns `None` if the data is structurally invalid: a record's file
    /// index out of range, or two records claiming the same `(file, start)`.
    /// Callers treat `None` as a corrupt blob and start fresh.
    pub(crate) fn from_parts(
        filenames: Vec<Utf8PathBuf>,
        records: Vec<RunRecord>,
    ) -> Option<Self> {
        let filename_indices = filenames
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), FileIndex(i as u32)))
            .collect();

        let mut position_indices = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if record.file.0 as usize >= filenames.len() {
                return None;
            }
            let previous =
                position_indices.insert((record.file, record.start), RecordKey(i as u32));
            if previous.is_some() {
                return None;
            }
        }

        Some(Self {
            filenames,
            filename_indices,
            records,
            position_indices,
        })
    }
}
