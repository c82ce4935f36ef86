//! Name-based exclusion of housekeeping files.
//!
//! The filter is consulted for every directory entry before any metadata is
//! read, on both sides of a comparison and on the source side of a copy.
//! Matching is exact and case-sensitive against the entry's leaf name.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::Path;

/// Names the operating system creates and rewrites on its own.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    ".DS_Store",         // Finder view settings, rewritten when a folder is opened
    ".ipspot_update",    // Spotlight photo data
    "ehthumbs.db",       // Windows Media Center thumbnails
    "ehthumbs_vista.db", // Windows Media Center thumbnails
    "Thumbs.db",         // Windows Explorer thumbnails
];

/// Verdict for one directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preprocess {
    /// Do not touch the entry; report it as skipped
    Skip,
    /// Process the entry normally
    Continue,
}

/// An immutable set of bare entry names to skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionFilter {
    names: BTreeSet<String>,
}

impl Default for ExclusionFilter {
    fn default() -> Self {
        ExclusionFilter::from_names(DEFAULT_EXCLUSIONS.iter().copied())
    }
}

impl ExclusionFilter {
    /// A filter that skips nothing.
    pub fn empty() -> Self {
        ExclusionFilter {
            names: BTreeSet::new(),
        }
    }

    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ExclusionFilter {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Add one more name to skip.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn extend<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Decide whether the entry `name` inside `parent` is processed.
    ///
    /// Only the leaf name is consulted; `parent` is accepted so callers can
    /// log where a skip happened.
    pub fn preprocess(&self, parent: &Path, name: &OsStr) -> Preprocess {
        if self.is_excluded(name) {
            tracing::debug!(parent = %parent.display(), name = ?name, "excluded by name");
            Preprocess::Skip
        } else {
            Preprocess::Continue
        }
    }

    /// Returns true if `name` is in the set. Names that are not valid
    /// UTF-8 never match.
    pub fn is_excluded(&self, name: &OsStr) -> bool {
        name.to_str().is_some_and(|n| self.names.contains(n))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
