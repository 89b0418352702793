// Copyright (c) The covskip Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Whole-file content digests, used to short-circuit per-run verification.
//!
//! Digesting a whole file once is much cheaper than re-extracting and
//! re-checksumming every recorded run in it, and most files in a tree are
//! untouched between sessions. The cache keeps two generations: the
//! read-only baseline loaded from the previous session, and the digests
//! computed on demand this session.

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::debug;

/// A whole-file SHA-256 digest, hex-encoded.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct FileDigest(String);

impl FileDigest {
    fn of_file(file: &Utf8Path) -> Option<Self> {
        match std::fs::read(file) {
            Ok(bytes) => Some(Self(hex::encode(Sha256::digest(&bytes)))),
            Err(error) => {
                debug!("failed to digest `{file}`: {error}");
                None
            }
        }
    }
}

/// Per-file whole-content digests, two generations.
///
/// `None` entries record that a file could not be read when its digest was
/// taken. A missing or `None` digest on either side means "cannot prove
/// unchanged", which is never treated as unchanged.
#[derive(Debug, Default)]
pub struct FileDigestCache {
    previous: BTreeMap<Utf8PathBuf, Option<FileDigest>>,
    current: BTreeMap<Utf8PathBuf, Option<FileDigest>>,
}

impl FileDigestCache {
    /// Creates a cache with the given previous-session baseline.
    pub fn with_baseline(previous: BTreeMap<Utf8PathBuf, Option<FileDigest>>) -> Self {
        Self {
            previous,
            current: BTreeMap::new(),
        }
    }

    /// Digests every file in `files` that has not been digested this
    /// session. Unreadable files are recorded with a `None` sentinel.
    pub fn digest_missing<'a>(&mut self, files: impl IntoIterator<Item = &'a Utf8Path>) {
        for file in files {
            if !self.current.contains_key(file) {
                self.current
                    .insert(file.to_owned(), FileDigest::of_file(file));
            }
        }
    }

    /// Returns true only if `file` has a digest in both generations and they
    /// are equal. Computes (and caches) the current digest if needed.
    pub fn is_unchanged(&mut self, file: &Utf8Path) -> bool {
        if !self.current.contains_key(file) {
            self.current
                .insert(file.to_owned(), FileDigest::of_file(file));
        }

        match (self.previous.get(file), &self.current[file]) {
            (Some(Some(previous)), Some(current)) => previous == current,
            _ => false,
        }
    }

    /// Consumes the cache and returns this session's digests, which become
    /// the next session's baseline.
    pub(crate) fn into_current(self) -> BTreeMap<Utf8PathBuf, Option<FileDigest>> {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::Utf8TempDir;

    #[test]
    fn unchanged_requires_both_generations() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "a();\n").unwrap();

        // No baseline: a fresh digest alone proves nothing.
        let mut cache = FileDigestCache::default();
        assert!(!cache.is_unchanged(&path));

        // Carry the digest forward as a baseline; the file is now provably
        // unchanged.
        let baseline = cache.into_current();
        let mut cache = FileDigestCache::with_baseline(baseline.clone());
        assert!(cache.is_unchanged(&path));

        // Modifying the file breaks the match in a fresh session.
        std::fs::write(&path, "b();\n").unwrap();
        let mut cache = FileDigestCache::with_baseline(baseline);
        assert!(!cache.is_unchanged(&path));
    }

    #[test]
    fn unreadable_file_digests_to_sentinel() {
        let dir = Utf8TempDir::new().unwrap();
        let missing = dir.path().join("missing.rs");

        let mut cache = FileDigestCache::default();
        cache.digest_missing([missing.as_path()]);
        assert!(!cache.is_unchanged(&missing));
        assert_eq!(cache.into_current().get(&missing), Some(&None));
    }

    #[test]
    fn deleted_file_is_never_unchanged() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "a();\n").unwrap();

        let mut cache = FileDigestCache::default();
        cache.digest_missing([path.as_path()]);
        let baseline = cache.into_current();

        std::fs::remove_file(&path).unwrap();
        let mut cache = FileDigestCache::with_baseline(baseline);
        assert!(!cache.is_unchanged(&path));
    }

    #[test]
    fn digest_computed_at_most_once_per_session() {
        let dir = Utf8TempDir::new().unwrap();
        let path = dir.path().join("a.rs");
        std::fs::write(&path, "a();\n").unwrap();

        let mut cache = FileDigestCache::default();
        cache.digest_missing([path.as_path()]);
        let first = cache.current[&path].clone();

        // A rewrite after the first digest is not observed this session.
        std::fs::write(&path, "changed();\n").unwrap();
        cache.digest_missing([path.as_path()]);
        assert_eq!(cache.current[&path], first);
    }
}
