//! Depth-first watch installation over a directory subtree.

use std::path::Path;

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::backend::NotifyBackend;
use crate::error::{Result, WatchError};
use crate::exclusion::ExclusionFilter;
use crate::registry::WatchRegistry;

/// Installs watches on every non-excluded directory under a root.
pub struct RecursiveWalker<'a, B: NotifyBackend> {
    backend: &'a mut B,
    registry: &'a mut WatchRegistry,
    exclusion: &'a ExclusionFilter,
}

impl<'a, B: NotifyBackend> RecursiveWalker<'a, B> {
    /// Create a walker over the session's collaborators.
    pub fn new(
        backend: &'a mut B,
        registry: &'a mut WatchRegistry,
        exclusion: &'a ExclusionFilter,
    ) -> Self {
        Self {
            backend,
            registry,
            exclusion,
        }
    }

    /// Watch `root` and every directory beneath it.
    ///
    /// Symlinks are not followed. Excluded directories are neither watched
    /// nor descended into. Directories that vanish mid-walk are skipped.
    /// Returns the number of watches installed.
    pub fn install_subtree(&mut self, root: &Path) -> Result<usize> {
        let mut installed = 0;
        let mut entries = WalkDir::new(root).follow_links(false).into_iter();

        while let Some(entry) = entries.next() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(source) => {
                    let err = WatchError::Walk {
                        path: source.path().unwrap_or(root).to_path_buf(),
                        source,
                    };
                    if err.is_vanished() {
                        debug!("Skipping vanished entry: {err}");
                        continue;
                    }
                    return Err(err);
                }
            };

            if !entry.file_type().is_dir() {
                continue;
            }

            let path = entry.path();
            if self.exclusion.excludes(path) {
                debug!("Excluded: {}", path.display());
                entries.skip_current_dir();
                continue;
            }

            match self.backend.add_watch(path) {
                Ok(handle) => {
                    debug!("Watching {}: {handle}", path.display());
                    if let Some(stale) = self.registry.add(handle, path) {
                        self.backend.remove_watch(stale)?;
                    }
                    installed += 1;
                }
                Err(err) if err.is_vanished() => {
                    debug!("Directory vanished before watch: {}", path.display());
                    entries.skip_current_dir();
                }
                Err(err) => {
                    warn!("Watch installation failed at {}", path.display());
                    return Err(err);
                }
            }
        }

        Ok(installed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::WatchHandle;
    use crate::testing::ScriptedBackend;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn watched(registry: &WatchRegistry, root: &Path) -> Vec<String> {
        registry
            .iter()
            .map(|(path, _)| {
                path.strip_prefix(root)
                    .unwrap()
                    .display()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn test_installs_every_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::write(root.join("x"), "file").unwrap();
        fs::create_dir_all(root.join("y/z")).unwrap();

        let mut backend = ScriptedBackend::new();
        let mut registry = WatchRegistry::new();
        let exclusion = ExclusionFilter::default();

        let installed = RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(root)
            .unwrap();

        assert_eq!(installed, 3);
        assert_eq!(watched(&registry, root), vec!["", "y", "y/z"]);
        assert_eq!(backend.added.len(), 3);
    }

    #[test]
    fn test_stale_watch_at_reinstalled_path_is_released() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir(root.join("y")).unwrap();

        let mut backend = ScriptedBackend::new();
        let mut registry = WatchRegistry::new();
        let stale = WatchHandle::new(900);
        registry.add(stale, root.join("y"));
        let exclusion = ExclusionFilter::default();

        RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(root)
            .unwrap();

        assert_eq!(backend.removed, vec![stale]);
        assert_eq!(registry.len(), 2);
        assert_ne!(registry.find_by_path(&root.join("y")), Some(stale));
    }

    #[test]
    fn test_excluded_directory_is_not_descended() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("node_modules/sub")).unwrap();

        let mut backend = ScriptedBackend::new();
        let mut registry = WatchRegistry::new();
        let exclusion = ExclusionFilter::new(["node_modules"]);

        RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(root)
            .unwrap();

        assert_eq!(watched(&registry, root), vec![""]);
    }

    #[test]
    fn test_excluded_root_installs_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("target");
        fs::create_dir_all(root.join("debug")).unwrap();

        let mut backend = ScriptedBackend::new();
        let mut registry = WatchRegistry::new();
        let exclusion = ExclusionFilter::new(["target"]);

        let installed = RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(&root)
            .unwrap();

        assert_eq!(installed, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_missing_root_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();

        let mut backend = ScriptedBackend::new();
        let mut registry = WatchRegistry::new();
        let exclusion = ExclusionFilter::default();

        let installed = RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(&temp_dir.path().join("gone"))
            .unwrap();

        assert_eq!(installed, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_backend_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("locked")).unwrap();

        let mut backend = ScriptedBackend::new();
        backend.fail_add(
            temp_dir.path().join("locked"),
            io::ErrorKind::PermissionDenied,
        );
        let mut registry = WatchRegistry::new();
        let exclusion = ExclusionFilter::default();

        let err = RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(temp_dir.path())
            .unwrap_err();

        assert!(matches!(err, WatchError::AddWatch { .. }));
    }

    #[test]
    fn test_vanished_subdirectory_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("racy/child")).unwrap();
        fs::create_dir(temp_dir.path().join("stable")).unwrap();

        let mut backend = ScriptedBackend::new();
        backend.fail_add(temp_dir.path().join("racy"), io::ErrorKind::NotFound);
        let mut registry = WatchRegistry::new();
        let exclusion = ExclusionFilter::default();

        RecursiveWalker::new(&mut backend, &mut registry, &exclusion)
            .install_subtree(temp_dir.path())
            .unwrap();

        assert_eq!(watched(&registry, temp_dir.path()), vec!["", "stable"]);
    }
}
