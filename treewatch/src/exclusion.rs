//! Basename exclusion for watched directories.

use std::collections::HashSet;
use std::ffi::{OsStr, OsString};
use std::path::Path;

/// Immutable set of directory basenames that are never watched.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    names: HashSet<OsString>,
}

impl ExclusionFilter {
    /// Create a filter from literal basenames.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Self {
            names: names
                .into_iter()
                .map(|name| name.as_ref().to_os_string())
                .collect(),
        }
    }

    /// Check if the final segment of `path` is excluded.
    pub fn excludes(&self, path: &Path) -> bool {
        path.file_name()
            .is_some_and(|name| self.names.contains(name))
    }

    /// Number of excluded names.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Check if nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
