// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The persisted cross-session state format.
//!
//! The engine's state is serialized as a single JSON document at session end
//! and handed back at the start of the next session; the host owns the
//! storage location and medium. Any incompatibility (parse failure, version
//! mismatch, structural invalidity) discards the whole document and the
//! engine starts fresh, treating every test as new. There is no partial
//! migration: correctness over cache retention.

use crate::{
    digest::FileDigest,
    engine::TestId,
    store::{FileIndex, RecordKey, RecordStore, RunChecksum, RunRecord},
};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
use tracing::warn;

/// Version of the persisted session state format.
///
/// Increment this on any semantic change to the document layout or to the
/// run checksum function: a mismatch invalidates the entire document.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct StateFormatVersion(u32);

impl StateFormatVersion {
    /// Creates a new `StateFormatVersion`.
    pub const fn new(version: u32) -> Self {
        Self(version)
    }
}

impl fmt::Display for StateFormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The current state format version.
pub const STATE_FORMAT_VERSION: StateFormatVersion = StateFormatVersion::new(1);

/// One persisted run record: `(filename index, start, end, checksum)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct RecordedRange(pub FileIndex, pub u32, pub u32, pub RunChecksum);

/// The persisted form of the record store: interned filenames plus recorded
/// ranges, both in first-seen order so keys and indices stay stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LineCacheState {
    /// Interned filenames; a range's [`FileIndex`] points into this list.
    pub filenames: Vec<Utf8PathBuf>,
    /// Recorded ranges; a fingerprint's [`RecordKey`] points into this list.
    pub recorded_ranges: Vec<RecordedRange>,
}

/// All state carried from one session to the next.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionState {
    /// Format version; checked against [`STATE_FORMAT_VERSION`] on decode.
    pub version: StateFormatVersion,
    /// Tests that failed last session; always re-executed.
    pub failed_tests: BTreeSet<TestId>,
    /// Whole-file digest baseline (`None` marks a file that was unreadable).
    pub file_hashes: BTreeMap<Utf8PathBuf, Option<FileDigest>>,
    /// The record store contents.
    pub line_cache: LineCacheState,
    /// Per-test dependency fingerprints, as ordered lists of record keys.
    pub fingerprints: BTreeMap<TestId, Vec<RecordKey>>,
}

impl SessionState {
    /// Serializes the state to a JSON document.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("session state serializes to JSON")
    }

    /// Deserializes a previously encoded state document.
    ///
    /// Returns `None`, never an error, if the document cannot be parsed or
    /// its version does not match [`STATE_FORMAT_VERSION`]. Callers proceed
    /// as if no prior session existed.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let state: Self = match serde_json::from_slice(bytes) {
            Ok(state) => state,
            Err(error) => {
                warn!("discarding unparseable session state: {error}");
                return None;
            }
        };
        if state.version != STATE_FORMAT_VERSION {
            warn!(
                "discarding session state with version {} (expected {})",
                state.version, STATE_FORMAT_VERSION,
            );
            return None;
        }
        Some(state)
    }

    /// Rebuilds the record store and validates fingerprints against it.
    ///
    /// Returns `None` if the state is structurally invalid: a range with an
    /// out-of-range filename index, duplicate `(file, start)` positions, or a
    /// fingerprint referencing a key past the end of the range list.
    pub(crate) fn into_store_and_fingerprints(
        self,
    ) -> Option<(RecordStore, BTreeMap<TestId, Vec<RecordKey>>, SessionCarryover)> {
        let record_count = self.line_cache.recorded_ranges.len();
        let records = self
            .line_cache
            .recorded_ranges
            .iter()
            .map(|&RecordedRange(file, start, end, checksum)| RunRecord {
                file,
                start,
                end,
                checksum,
            })
            .collect();

        let store = match RecordStore::from_parts(self.line_cache.filenames, records) {
            Some(store) => store,
            None => {
                warn!("discarding structurally invalid line cache state");
                return None;
            }
        };

        for keys in self.fingerprints.values() {
            if keys.iter().any(|key| !key.in_range(record_count)) {
                warn!("discarding session state with out-of-range fingerprint keys");
                return None;
            }
        }

        let carryover = SessionCarryover {
            failed_tests: self.failed_tests,
            file_hashes: self.file_hashes,
        };
        Some((store, self.fingerprints, carryover))
    }

    /// Assembles the state persisted at session end.
    pub(crate) fn from_parts(
        store: &RecordStore,
        fingerprints: BTreeMap<TestId, Vec<RecordKey>>,
        failed_tests: BTreeSet<TestId>,
        file_hashes: BTreeMap<Utf8PathBuf, Option<FileDigest>>,
    ) -> Self {
        let recorded_ranges = store
            .records()
            .iter()
            .map(|record| RecordedRange(record.file, record.start, record.end, record.checksum))
            .collect();

        Self {
            version: STATE_FORMAT_VERSION,
            failed_tests,
            file_hashes,
            line_cache: LineCacheState {
                filenames: store.filenames().to_vec(),
                recorded_ranges,
            },
            fingerprints,
        }
    }
}

/// Non-store state a decoded document contributes to the new session.
pub(crate) struct SessionCarryover {
    pub(crate) failed_tests: BTreeSet<TestId>,
    pub(crate) file_hashes: BTreeMap<Utf8PathBuf, Option<FileDigest>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample_state() -> SessionState {
        SessionState {
            version: STATE_FORMAT_VERSION,
            failed_tests: [TestId::new("tests::flaky")].into_iter().collect(),
            file_hashes: BTreeMap::new(),
            line_cache: LineCacheState {
                filenames: vec!["src/a.rs".into()],
                recorded_ranges: vec![RecordedRange(
                    FileIndex::new(0),
                    2,
                    6,
                    crate::store::run_checksum("content"),
                )],
            },
            fingerprints: [(TestId::new("tests::a"), vec![RecordKey::new(0)])]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let state = sample_state();
        assert_eq!(SessionState::decode(&state.encode()), Some(state));
    }

    #[test]
    fn version_mismatch_discards_state() {
        let mut state = sample_state();
        state.version = StateFormatVersion::new(999);
        assert_eq!(SessionState::decode(&state.encode()), None);
    }

    #[test]
    fn garbage_input_discards_state() {
        assert_eq!(SessionState::decode(b"not json"), None);
        assert_eq!(SessionState::decode(br#"{"version": 1}"#), None);
    }

    #[test]
    fn out_of_range_fingerprint_key_discards_state() {
        let mut state = sample_state();
        state
            .fingerprints
            .insert(TestId::new("tests::bad"), vec![RecordKey::new(7)]);
        assert!(state.into_store_and_fingerprints().is_none());
    }

    #[test]
    fn out_of_range_file_index_discards_state() {
        let mut state = sample_state();
        state.line_cache.recorded_ranges.push(RecordedRange(
            FileIndex::new(5),
            0,
            1,
            crate::store::run_checksum("x"),
        ));
        assert!(state.into_store_and_fingerprints().is_none());
    }
}
