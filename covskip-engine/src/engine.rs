// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The per-session decision engine.
//!
//! The engine owns all mutable state for one session: the record store, the
//! digest and content caches, the fingerprints recorded so far, and the set
//! of failed tests. The host drives it through four operations:
//!
//! - [`Engine::begin_session`] with the previous session's decoded state (or
//!   `None` for a fresh start);
//! - [`Engine::decide`] before a test would execute;
//! - [`Engine::record`] after a test executed, with its coverage;
//! - [`Engine::end_session`] to produce the state for the next session.
//!
//! Tests execute strictly one at a time from the engine's point of view;
//! nothing here is async and no locking exists because the engine is the
//! sole owner of its state for the session's duration.
//!
//! # Known limitation
//!
//! A file rewritten during its own test's execution (after content was
//! snapshotted for extraction but before session end) may produce a
//! fingerprint that does not match the next session's on-disk state. The
//! session-scoped content cache keeps each session internally consistent;
//! the cross-session race remains and the affected test simply re-runs
//! until record and disk agree.

use crate::{
    coverage::CoverageData,
    digest::FileDigestCache,
    errors::RecordError,
    extract::{FileContentCache, extract_runs},
    format::{SessionCarryover, SessionState},
    resolve::resolve_coverage,
    store::{RecordKey, RecordStore, run_checksum},
};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    fmt,
};
use tracing::debug;

/// The identity of a test, unique within a session.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TestId(SmolStr);

impl TestId {
    /// Creates a new `TestId`.
    pub fn new(id: impl Into<SmolStr>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TestId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

/// The outcome of the decide phase for one test.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// The test must execute.
    Run,
    /// Every run in the test's previous fingerprint is provably unchanged;
    /// the test can be deselected.
    Skip,
}

/// The decision engine for one session.
#[derive(Debug, Default)]
pub struct Engine {
    store: RecordStore,
    digests: FileDigestCache,
    contents: FileContentCache,

    previously_failed: BTreeSet<TestId>,
    failed: BTreeSet<TestId>,

    previous_fingerprints: BTreeMap<TestId, Vec<RecordKey>>,
    fingerprints: BTreeMap<TestId, Vec<RecordKey>>,

    exempt: BTreeSet<TestId>,

    // Keys verified identical this session, shared across all tests that
    // reference them.
    verified_keys: HashSet<RecordKey>,
}

impl Engine {
    /// Starts a session from the previous session's state.
    ///
    /// A `None` state, or a state that fails structural validation, yields an
    /// empty engine: every test is treated as new.
    pub fn begin_session(state: Option<SessionState>) -> Self {
        let Some(state) = state else {
            return Self::default();
        };

        let Some((store, previous_fingerprints, carryover)) = state.into_store_and_fingerprints()
        else {
            return Self::default();
        };
        let SessionCarryover {
            failed_tests,
            file_hashes,
        } = carryover;

        Self {
            store,
            digests: FileDigestCache::with_baseline(file_hashes),
            previously_failed: failed_tests,
            previous_fingerprints,
            ..Self::default()
        }
    }

    /// Marks a test as exempt from skip decisions.
    ///
    /// Exempt tests depend on state outside source control (network,
    /// external services); their correctness cannot be derived from
    /// source-line diffs, so [`decide`](Self::decide) always answers
    /// [`Decision::Run`] for them.
    pub fn mark_exempt(&mut self, test_id: TestId) {
        self.exempt.insert(test_id);
    }

    /// Decides whether `test_id` must execute this session.
    ///
    /// A test runs if it is exempt, was never recorded, failed last session,
    /// or if any run in its previous fingerprint cannot be proven unchanged.
    /// Verification short-circuits on the first changed run, and keys proven
    /// identical are memoized for the whole session, so shared fixtures are
    /// verified once rather than once per test.
    pub fn decide(&mut self, test_id: &TestId) -> Decision {
        if self.exempt.contains(test_id) {
            return Decision::Run;
        }

        let Some(keys) = self.previous_fingerprints.get(test_id) else {
            return Decision::Run;
        };

        if self.previously_failed.contains(test_id) {
            debug!("test `{test_id}` failed last session, running");
            return Decision::Run;
        }

        let keys = keys.clone();
        for key in keys {
            if self.verified_keys.contains(&key) {
                continue;
            }
            if !self.verify_key(key) {
                return Decision::Run;
            }
            self.verified_keys.insert(key);
        }

        Decision::Skip
    }

    /// Verifies that the run stored under `key` still matches the file on
    /// disk. Soft failures (missing file, vanished run) report "changed".
    fn verify_key(&mut self, key: RecordKey) -> bool {
        let Some(record) = self.store.lookup(key) else {
            return false;
        };
        let Some(file) = self.store.filename(record.file).map(|f| f.to_owned()) else {
            return false;
        };

        // Fast path: an untouched file proves all its runs unchanged.
        if self.digests.is_unchanged(&file) {
            return true;
        }

        // Re-extract restricted to exactly the stored interval. Anything but
        // a single run with the stored checksum means the file shrank, the
        // run split, or its content changed.
        let interesting: BTreeSet<u32> = (record.start..record.end).collect();
        let Some(runs) = extract_runs(&mut self.contents, &file, &interesting) else {
            debug!("cannot read `{file}`, treating run {key} as changed");
            return false;
        };
        match runs.as_slice() {
            [run] => run_checksum(&run.content) == record.checksum,
            _ => false,
        }
    }

    /// Records the dependency fingerprint of a test that just executed.
    ///
    /// `passed` must be false only for real failures. A host that supports
    /// expected failures (xfail and the like) reports those as passed, since
    /// they should not force re-execution forever.
    ///
    /// # Errors
    ///
    /// [`RecordError::DuplicateTest`] if `test_id` was already recorded this
    /// session, and [`RecordError::Store`] on an internal-consistency
    /// violation; the latter is fatal and the session must not be persisted.
    pub fn record(
        &mut self,
        test_id: TestId,
        coverage: &CoverageData,
        passed: bool,
    ) -> Result<(), RecordError> {
        if self.fingerprints.contains_key(&test_id) {
            return Err(RecordError::DuplicateTest {
                test_id: test_id.to_string(),
            });
        }

        // Snapshot content and digests for every measured file up front, so
        // record and decide phases share one stable read per session.
        for file in coverage.measured_files() {
            self.contents.prefetch(file);
        }
        self.digests.digest_missing(coverage.measured_files());

        let resolved = resolve_coverage(coverage, &mut self.store);
        let mut keys = resolved.reused;

        for (file, lines) in &resolved.unexplained {
            let file_index = self.store.filename_index(file);
            let Some(runs) = extract_runs(&mut self.contents, file, lines) else {
                // Unreadable file: its runs cannot be recorded, which leaves
                // them unverifiable and forces a run next session.
                debug!("cannot read `{file}` while recording `{test_id}`");
                continue;
            };
            for run in runs {
                keys.push(
                    self.store
                        .save_record(file_index, run.start, run.end, &run.content)?,
                );
            }
        }

        if !passed {
            self.failed.insert(test_id.clone());
        }

        self.fingerprints.insert(test_id, keys);
        Ok(())
    }

    /// Ends the session and produces the state to persist for the next one.
    ///
    /// Fingerprints merge with the previous session's (current wins on
    /// collision); the failed set is replaced by this session's failures;
    /// digests computed this session become the next baseline.
    pub fn end_session(self) -> SessionState {
        let mut fingerprints = self.previous_fingerprints;
        fingerprints.extend(self.fingerprints);

        SessionState::from_parts(
            &self.store,
            fingerprints,
            self.failed,
            self.digests.into_current(),
        )
    }
}
