//! Bookkeeping between watch handles and the directories they cover.
//!
//! The registry is keyed two ways: a hash map from handle to path for
//! exact lookups on incoming events, and a sorted path index for exact
//! lookups and subtree operations. `Path` orders component by component,
//! so every descendant of a directory sorts into one contiguous range that
//! starts at the directory itself.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::event::WatchHandle;

/// Map of live watches. Single-threaded; owned by one session.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    /// Path of each live handle.
    paths: HashMap<WatchHandle, PathBuf>,

    /// Handle of each watched path, sorted for prefix scans.
    handles: BTreeMap<PathBuf, WatchHandle>,
}

impl WatchRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a watch.
    ///
    /// Re-adding a known handle moves it to the new path. Adding a path
    /// that another handle holds replaces that entry and returns the
    /// displaced handle; its backend watch is the caller's to release.
    pub fn add(&mut self, handle: WatchHandle, path: impl Into<PathBuf>) -> Option<WatchHandle> {
        let path = path.into();

        if let Some(old_path) = self.paths.remove(&handle) {
            self.handles.remove(&old_path);
        }
        let displaced = self
            .handles
            .insert(path.clone(), handle)
            .filter(|displaced| *displaced != handle);
        if let Some(displaced) = displaced {
            debug!("{displaced} displaced from {}", path.display());
            self.paths.remove(&displaced);
        }
        self.paths.insert(handle, path);
        displaced
    }

    /// Path recorded for a handle.
    pub fn find_by_handle(&self, handle: WatchHandle) -> Option<&Path> {
        self.paths.get(&handle).map(PathBuf::as_path)
    }

    /// Handle recorded for an exact path.
    pub fn find_by_path(&self, path: &Path) -> Option<WatchHandle> {
        self.handles.get(path).copied()
    }

    /// Forget one handle. Returns its path if it was known.
    pub fn remove_by_handle(&mut self, handle: WatchHandle) -> Option<PathBuf> {
        let path = self.paths.remove(&handle)?;
        self.handles.remove(&path);
        Some(path)
    }

    /// Remove `prefix` and everything beneath it.
    ///
    /// `on_removed` sees each handle before its entry is dropped so the
    /// caller can release the backend watch. The first error stops the
    /// sweep; entries already visited stay removed.
    pub fn remove_subtree<E, F>(&mut self, prefix: &Path, mut on_removed: F) -> Result<usize, E>
    where
        F: FnMut(WatchHandle) -> Result<(), E>,
    {
        let doomed = self.subtree(prefix);
        let count = doomed.len();

        for (path, handle) in doomed {
            on_removed(handle)?;
            self.handles.remove(&path);
            self.paths.remove(&handle);
        }

        Ok(count)
    }

    /// Re-home `old_prefix` and everything beneath it under `new_prefix`.
    ///
    /// Handles are untouched; only recorded paths change. Returns the
    /// number of entries rewritten.
    ///
    /// Entries already under `new_prefix` are overwritten without touching
    /// their backend watches. Callers release that subtree first with
    /// [`WatchRegistry::remove_subtree`].
    pub fn rename_subtree(&mut self, old_prefix: &Path, new_prefix: &Path) -> usize {
        if old_prefix == new_prefix {
            return 0;
        }

        let moved = self.subtree(old_prefix);
        for (path, _) in &moved {
            self.handles.remove(path);
        }

        let count = moved.len();
        for (path, handle) in moved {
            let renamed = match path.strip_prefix(old_prefix) {
                Ok(rest) if rest.as_os_str().is_empty() => new_prefix.to_path_buf(),
                Ok(rest) => new_prefix.join(rest),
                Err(_) => path,
            };
            if let Some(displaced) = self.handles.insert(renamed.clone(), handle) {
                if displaced != handle {
                    debug!("{displaced} displaced from {}", renamed.display());
                    self.paths.remove(&displaced);
                }
            }
            self.paths.insert(handle, renamed);
        }

        count
    }

    /// Number of live watches.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Check if no watches are recorded.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Iterate entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&Path, WatchHandle)> {
        self.handles
            .iter()
            .map(|(path, handle)| (path.as_path(), *handle))
    }

    fn subtree(&self, prefix: &Path) -> Vec<(PathBuf, WatchHandle)> {
        self.handles
            .range(prefix.to_path_buf()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, handle)| (path.clone(), *handle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::convert::Infallible;

    fn h(id: u64) -> WatchHandle {
        WatchHandle::new(id)
    }

    fn registry(entries: &[(u64, &str)]) -> WatchRegistry {
        let mut registry = WatchRegistry::new();
        for (id, path) in entries {
            registry.add(h(*id), *path);
        }
        registry
    }

    fn snapshot(registry: &WatchRegistry) -> Vec<(String, u64)> {
        registry
            .iter()
            .map(|(path, handle)| (path.display().to_string(), handle.id()))
            .collect()
    }

    #[test]
    fn test_lookup_both_ways() {
        let registry = registry(&[(1, "/root"), (2, "/root/a")]);

        assert_eq!(registry.find_by_handle(h(2)), Some(Path::new("/root/a")));
        assert_eq!(registry.find_by_path(Path::new("/root")), Some(h(1)));
        assert_eq!(registry.find_by_path(Path::new("/root/b")), None);
        assert_eq!(registry.find_by_handle(h(9)), None);
    }

    #[test]
    fn test_re_adding_handle_moves_it() {
        let mut registry = registry(&[(1, "/root/a")]);
        registry.add(h(1), "/root/b");

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_path(Path::new("/root/a")), None);
        assert_eq!(registry.find_by_path(Path::new("/root/b")), Some(h(1)));
    }

    #[test]
    fn test_adding_taken_path_displaces_old_handle() {
        let mut registry = registry(&[(1, "/root/a")]);
        assert_eq!(registry.add(h(2), "/root/a"), Some(h(1)));
        assert_eq!(registry.add(h(2), "/root/a"), None);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.find_by_handle(h(1)), None);
        assert_eq!(registry.find_by_path(Path::new("/root/a")), Some(h(2)));
    }

    #[test]
    fn test_remove_by_handle() {
        let mut registry = registry(&[(1, "/root"), (2, "/root/a")]);

        assert_eq!(registry.remove_by_handle(h(2)), Some(PathBuf::from("/root/a")));
        assert_eq!(registry.remove_by_handle(h(2)), None);
        assert_eq!(snapshot(&registry), vec![("/root".to_string(), 1)]);
    }

    #[test]
    fn test_remove_subtree_spares_siblings_with_shared_prefix() {
        let mut registry = registry(&[
            (1, "/root"),
            (2, "/root/a"),
            (3, "/root/a/x"),
            (4, "/root/a/x/y"),
            (5, "/root/ab"),
            (6, "/root/a-b"),
        ]);

        let mut released = Vec::new();
        let removed = registry
            .remove_subtree(Path::new("/root/a"), |handle| {
                released.push(handle.id());
                Ok::<_, Infallible>(())
            })
            .unwrap();

        released.sort_unstable();
        assert_eq!(removed, 3);
        assert_eq!(released, vec![2, 3, 4]);
        assert_eq!(
            snapshot(&registry),
            vec![
                ("/root".to_string(), 1),
                ("/root/a-b".to_string(), 6),
                ("/root/ab".to_string(), 5),
            ]
        );
    }

    #[test]
    fn test_remove_subtree_stops_on_error() {
        let mut registry = registry(&[(1, "/root"), (2, "/root/a")]);

        let result = registry.remove_subtree(Path::new("/root"), |_| Err("backend gone"));

        assert_eq!(result, Err("backend gone"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_rename_subtree_to_longer_and_shorter_names() {
        let mut registry = registry(&[
            (1, "/root"),
            (2, "/root/a"),
            (3, "/root/a/deep"),
            (4, "/root/ab"),
        ]);

        assert_eq!(registry.rename_subtree(Path::new("/root/a"), Path::new("/root/much-longer")), 2);
        assert_eq!(
            snapshot(&registry),
            vec![
                ("/root".to_string(), 1),
                ("/root/ab".to_string(), 4),
                ("/root/much-longer".to_string(), 2),
                ("/root/much-longer/deep".to_string(), 3),
            ]
        );

        registry.rename_subtree(Path::new("/root/much-longer"), Path::new("/root/z"));
        assert_eq!(registry.find_by_path(Path::new("/root/z/deep")), Some(h(3)));
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn test_rename_into_nested_location() {
        let mut registry = registry(&[(1, "/root"), (2, "/root/a"), (3, "/root/b")]);

        registry.rename_subtree(Path::new("/root/a"), Path::new("/root/b/a"));

        assert_eq!(registry.find_by_path(Path::new("/root/b/a")), Some(h(2)));
        assert_eq!(registry.find_by_path(Path::new("/root/b")), Some(h(3)));
    }

    #[test]
    fn test_rename_round_trip_restores_registry() {
        let mut registry = registry(&[
            (1, "/root"),
            (2, "/root/src"),
            (3, "/root/src/bin"),
            (4, "/root/src/lib"),
            (5, "/root/srcs"),
        ]);
        let before = snapshot(&registry);

        registry.rename_subtree(Path::new("/root/src"), Path::new("/root/s"));
        assert_ne!(snapshot(&registry), before);
        registry.rename_subtree(Path::new("/root/s"), Path::new("/root/src"));

        assert_eq!(snapshot(&registry), before);
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Add(u64, &'static str),
        Remove(&'static str),
        Rename(&'static str, &'static str),
    }

    fn within(path: &str, prefix: &str) -> bool {
        path == prefix || path.starts_with(&format!("{prefix}/"))
    }

    /// Plain list of entries with the same semantics, for comparison.
    fn apply_to_model(model: &mut Vec<(String, u64)>, op: Op) {
        match op {
            Op::Add(id, path) => {
                model.retain(|(p, h)| *h != id && p != path);
                model.push((path.to_string(), id));
            }
            Op::Remove(prefix) => model.retain(|(p, _)| !within(p, prefix)),
            Op::Rename(old, new) => {
                let (moved, kept): (Vec<_>, Vec<_>) =
                    model.drain(..).partition(|(p, _)| within(p, old));
                let moved: Vec<(String, u64)> = moved
                    .into_iter()
                    .map(|(p, h)| (format!("{new}{}", &p[old.len()..]), h))
                    .collect();
                model.extend(kept.into_iter().filter(|(p, _)| !moved.iter().any(|(m, _)| m == p)));
                model.extend(moved);
            }
        }
        model.sort_by(|(a, _), (b, _)| Path::new(a).cmp(Path::new(b)));
    }

    fn apply(registry: &mut WatchRegistry, op: Op) {
        match op {
            Op::Add(id, path) => {
                registry.add(h(id), path);
            }
            Op::Remove(prefix) => {
                registry
                    .remove_subtree(Path::new(prefix), |_| Ok::<_, Infallible>(()))
                    .unwrap();
            }
            Op::Rename(old, new) => {
                registry.rename_subtree(Path::new(old), Path::new(new));
            }
        }
    }

    fn assert_matches_model(ops: &[Op]) {
        let base = [(1, "/r"), (2, "/r/a"), (3, "/r/a/b"), (4, "/r/c"), (5, "/r/c/d"), (6, "/r/ab")];
        let mut registry = registry(&base);
        let mut model: Vec<(String, u64)> = Vec::new();
        for (id, path) in base {
            apply_to_model(&mut model, Op::Add(id, path));
        }

        for op in ops {
            apply(&mut registry, *op);
            apply_to_model(&mut model, *op);
            assert_eq!(snapshot(&registry), model, "after {ops:?}");
        }

        assert_eq!(registry.len(), model.len());
        for (path, id) in &model {
            assert_eq!(registry.find_by_handle(h(*id)), Some(Path::new(path)));
            assert_eq!(registry.find_by_path(Path::new(path)), Some(h(*id)));
        }
    }

    #[test]
    fn test_operation_sequences_match_model() {
        let sequences: &[&[Op]] = &[
            &[Op::Rename("/r/a", "/r/c/a"), Op::Remove("/r/c"), Op::Add(7, "/r/f")],
            &[Op::Rename("/r/a", "/r/c"), Op::Add(8, "/r/a")],
            &[Op::Remove("/r/a"), Op::Rename("/r/ab", "/r/a"), Op::Rename("/r/a", "/r/ab")],
            &[Op::Add(3, "/r/x"), Op::Rename("/r/a", "/r/x/a"), Op::Remove("/r/x/a/b")],
            &[Op::Rename("/r", "/s"), Op::Add(9, "/r"), Op::Remove("/s/c")],
            &[Op::Add(2, "/r/c"), Op::Remove("/r/c/d"), Op::Rename("/r/c", "/r/c2")],
        ];

        for ops in sequences {
            assert_matches_model(ops);
        }
    }

    #[test]
    fn test_every_short_sequence_matches_model() {
        let pool = [
            Op::Add(10, "/r/a/new"),
            Op::Add(4, "/r/a"),
            Op::Remove("/r/a"),
            Op::Remove("/r/c/d"),
            Op::Rename("/r/a", "/r/z"),
            Op::Rename("/r/c", "/r/a/c"),
            Op::Rename("/r/a/b", "/r/ab"),
            Op::Rename("/r/ab", "/r/c/d"),
        ];

        for first in pool {
            for second in pool {
                for third in pool {
                    assert_matches_model(&[first, second, third]);
                }
            }
        }
    }
}
