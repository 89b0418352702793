// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Core engine for covskip: coverage-driven test deselection.
//!
//! Across repeated test-suite runs, covskip decides which tests can safely
//! be skipped because none of the source code they depend on has changed
//! since they last passed. After each test executes, its per-file
//! executed-line coverage is condensed into a fingerprint: a list of keys
//! into a deduplicated store of *runs*, contiguous source intervals with
//! content checksums. On the next session, a test is skipped only if every
//! run in its previous fingerprint is provably unchanged on disk, and
//! never if it failed, was never seen, or is marked as depending on state
//! outside source control.
//!
//! The host test runner drives one [`Engine`] per session:
//!
//! ```
//! use covskip_engine::{CoverageData, Decision, Engine, SessionState};
//!
//! # let dir = camino_tempfile::Utf8TempDir::new().unwrap();
//! # let source = dir.path().join("lib.rs");
//! # std::fs::write(&source, "fn covered() {}\n").unwrap();
//! // Session 1: everything runs; record what each test touched.
//! let mut engine = Engine::begin_session(None);
//! assert_eq!(engine.decide(&"tests::covered".into()), Decision::Run);
//! let mut coverage = CoverageData::new();
//! coverage.add_lines(source, [1]);
//! engine.record("tests::covered".into(), &coverage, true)?;
//! let blob = engine.end_session().encode();
//!
//! // Session 2: nothing changed, so the test is deselected.
//! let mut engine = Engine::begin_session(SessionState::decode(&blob));
//! assert_eq!(engine.decide(&"tests::covered".into()), Decision::Skip);
//! # Ok::<(), covskip_engine::RecordError>(())
//! ```
//!
//! Skip decisions are deliberately conservative: anything that cannot be
//! proven unchanged (unreadable file, shrunk interval, checksum mismatch)
//! forces a run. The engine does no static analysis and no test execution;
//! coverage capture and test scheduling belong to the host.

mod coverage;
mod digest;
pub mod errors;
mod extract;
mod format;
mod resolve;
mod store;

mod engine;

pub use coverage::CoverageData;
pub use digest::FileDigest;
pub use engine::{Decision, Engine, TestId};
pub use errors::{RecordError, StoreConsistencyError};
pub use extract::{ExtractedRun, FileContentCache, extract_runs};
pub use format::{LineCacheState, RecordedRange, STATE_FORMAT_VERSION, SessionState, StateFormatVersion};
pub use resolve::{ResolvedCoverage, resolve_coverage};
pub use store::{FileIndex, RecordKey, RecordStore, RunChecksum, RunRecord, run_checksum};
