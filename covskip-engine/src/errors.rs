// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the covskip engine.

use crate::store::RunChecksum;
use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

/// An internal-consistency violation in the record store: two different runs
/// were recorded for the same `(file, start)` position within one session.
///
/// This indicates non-deterministic extraction and is fatal: the session must
/// abort without persisting, since a cache written past this point could
/// produce unsound skip decisions.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "conflicting dependency runs recorded for `{file}` at line {start}: \
     previously (end {existing_end}, checksum {existing_checksum}), \
     now (end {new_end}, checksum {new_checksum})"
)]
pub struct StoreConsistencyError {
    file: Utf8PathBuf,
    start: u32,
    existing_end: u32,
    existing_checksum: RunChecksum,
    new_end: u32,
    new_checksum: RunChecksum,
}

impl StoreConsistencyError {
    pub(crate) fn new(
        file: impl Into<Utf8PathBuf>,
        start: u32,
        existing_end: u32,
        existing_checksum: RunChecksum,
        new_end: u32,
        new_checksum: RunChecksum,
    ) -> Self {
        Self {
            file: file.into(),
            start,
            existing_end,
            existing_checksum,
            new_end,
            new_checksum,
        }
    }

    /// Returns the file the conflicting runs were recorded for.
    pub fn file(&self) -> &Utf8Path {
        &self.file
    }

    /// Returns the 0-indexed start line both runs claimed.
    pub fn start(&self) -> u32 {
        self.start
    }
}

/// An error that occurred while recording a test's dependency fingerprint.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    /// The record store detected an internal-consistency violation. Fatal;
    /// the session must not be persisted.
    #[error(transparent)]
    Store(#[from] StoreConsistencyError),

    /// The same test id was recorded twice within one session. Test identity
    /// must be unique per session; this is a host integration bug.
    #[error("test `{test_id}` was recorded twice in one session")]
    DuplicateTest {
        /// The test id that was recorded a second time.
        test_id: String,
    },
}
