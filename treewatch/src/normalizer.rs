//! Turns the backend's flat event stream into registry updates and feed
//! events.
//!
//! Directory moves arrive as two halves on the watches of the source and
//! destination parents. A `MOVED_FROM` is parked until its `MOVED_TO`
//! arrives with the same cookie; the pair is then a rename, and the
//! registry is rewritten in place because the kernel watches survive a
//! rename. A `MOVED_FROM` that never pairs within the batch means the
//! directory left the watched tree, and its whole subtree is unwatched.
//!
//! Backends without cookies fall back to adjacency: a cookieless move must
//! be completed by the very next event.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, error, info, trace, warn};

use crate::backend::NotifyBackend;
use crate::config::OverflowPolicy;
use crate::error::{Result, WatchError};
use crate::event::{EventKinds, NormalizedEvent, RawEvent, WatchHandle, kind_label};
use crate::exclusion::ExclusionFilter;
use crate::output::EventSink;
use crate::registry::WatchRegistry;
use crate::walker::RecursiveWalker;

/// A directory seen leaving its parent, waiting for its other half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    /// Path the directory had when it moved.
    pub from: PathBuf,

    /// Watch on the directory itself, if it was watched.
    pub handle: Option<WatchHandle>,
}

/// Counters for one normalizer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NormalizerStats {
    /// Events written to the sink.
    pub forwarded: u64,

    /// Events whose watch was already gone.
    pub dropped: u64,

    /// Moves resolved as in-tree renames.
    pub renames: u64,

    /// Moves resolved as leaving the tree.
    pub exits: u64,

    /// Queue overflows survived by rescanning.
    pub rescans: u64,
}

/// State machine for one watched tree.
#[derive(Debug)]
pub struct EventNormalizer {
    root: PathBuf,
    registry: WatchRegistry,
    exclusion: ExclusionFilter,
    pending: IndexMap<Option<u32>, PendingMove>,
    on_overflow: OverflowPolicy,
    stats: NormalizerStats,
}

impl EventNormalizer {
    /// Create a normalizer for `root`. No watches are installed yet.
    pub fn new(root: impl Into<PathBuf>, exclusion: ExclusionFilter) -> Self {
        Self {
            root: root.into(),
            registry: WatchRegistry::new(),
            exclusion,
            pending: IndexMap::new(),
            on_overflow: OverflowPolicy::default(),
            stats: NormalizerStats::default(),
        }
    }

    /// Set the overflow policy.
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.on_overflow = policy;
        self
    }

    /// Root of the watched tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Live watch bookkeeping.
    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Moves still waiting for their other half.
    pub fn pending(&self) -> impl Iterator<Item = &PendingMove> {
        self.pending.values()
    }

    /// Counters so far.
    pub fn stats(&self) -> NormalizerStats {
        self.stats
    }

    /// Watch the whole tree from the root.
    pub fn install_root<B: NotifyBackend>(&mut self, backend: &mut B) -> Result<usize> {
        let root = self.root.clone();
        self.install_subtree(backend, &root)
    }

    /// Process a complete batch: every event in order, then close out
    /// moves that never paired.
    pub fn process_batch<B, S>(
        &mut self,
        backend: &mut B,
        events: impl IntoIterator<Item = RawEvent>,
        sink: &mut S,
    ) -> Result<()>
    where
        B: NotifyBackend,
        S: EventSink + ?Sized,
    {
        for event in events {
            self.process_event(backend, event, sink)?;
        }
        self.finish_batch(backend)
    }

    /// Process one event.
    pub fn process_event<B, S>(&mut self, backend: &mut B, event: RawEvent, sink: &mut S) -> Result<()>
    where
        B: NotifyBackend,
        S: EventSink + ?Sized,
    {
        trace!(?event, "raw event");

        if event.is(EventKinds::QUEUE_OVERFLOW) {
            return self.overflow(backend);
        }

        if self.pending.contains_key(&None) && !completes_cookieless_move(&event) {
            self.resolve_exit(backend, None)?;
        }

        // Activity inside a moved directory means it did not stay in the tree.
        for cookie in self.pending_enclosing(&event) {
            self.resolve_exit(backend, cookie)?;
        }

        if event.is(EventKinds::WATCH_RETIRED) {
            if let Some(path) = event.handle.and_then(|h| self.registry.remove_by_handle(h)) {
                debug!("Watch retired: {}", path.display());
            }
            return Ok(());
        }

        if event.is_directory {
            if event.is(EventKinds::MOVED_TO) && self.pending.contains_key(&event.cookie) {
                self.complete_move(backend, &event)?;
            } else if event.is(EventKinds::CREATED | EventKinds::MOVED_TO) {
                self.enter_scope(backend, &event)?;
            }

            if event.is(EventKinds::MOVED_FROM) {
                self.begin_move(backend, &event)?;
            }
        }

        self.forward(&event, sink)
    }

    /// Resolve every move still pending as having left the tree.
    pub fn finish_batch<B: NotifyBackend>(&mut self, backend: &mut B) -> Result<()> {
        for (_, pending) in std::mem::take(&mut self.pending) {
            self.exit(backend, pending)?;
        }
        Ok(())
    }

    /// Release every watch. Pending moves are dropped.
    pub fn teardown<B: NotifyBackend>(&mut self, backend: &mut B) -> Result<usize> {
        self.pending.clear();
        let root = self.root.clone();
        self.registry
            .remove_subtree(&root, |handle| backend.remove_watch(handle))
    }

    fn install_subtree<B: NotifyBackend>(&mut self, backend: &mut B, path: &Path) -> Result<usize> {
        RecursiveWalker::new(backend, &mut self.registry, &self.exclusion).install_subtree(path)
    }

    /// Path of the child an event names, under its watched parent.
    fn child_path(&self, event: &RawEvent) -> Option<PathBuf> {
        let parent = self.registry.find_by_handle(event.handle?)?;
        Some(parent.join(event.name.as_ref()?))
    }

    fn begin_move<B: NotifyBackend>(&mut self, backend: &mut B, event: &RawEvent) -> Result<()> {
        let Some(from) = self.child_path(event) else {
            debug!("Move source under an unwatched parent, ignoring");
            return Ok(());
        };

        if self.pending.contains_key(&event.cookie) {
            self.resolve_exit(backend, event.cookie)?;
        }

        let handle = self.registry.find_by_path(&from);
        trace!("Pending move from {}", from.display());
        self.pending.insert(event.cookie, PendingMove { from, handle });
        Ok(())
    }

    fn complete_move<B: NotifyBackend>(&mut self, backend: &mut B, event: &RawEvent) -> Result<()> {
        let Some(pending) = self.pending.shift_remove(&event.cookie) else {
            return Ok(());
        };

        let Some(to) = self.child_path(event) else {
            debug!("Move destination under an unwatched parent");
            return self.exit(backend, pending);
        };
        self.resolve_overlapping(backend, &to)?;

        let from_excluded = self.exclusion.excludes(&pending.from);
        let to_excluded = self.exclusion.excludes(&to);

        match (from_excluded, to_excluded) {
            (true, false) => {
                debug!("Entered scope: {}", to.display());
                self.install_subtree(backend, &to)?;
            }
            (false, true) => {
                debug!("Left scope: {} -> {}", pending.from.display(), to.display());
                return self.exit(backend, pending);
            }
            (true, true) => {}
            (false, false) => {
                let from = self.current_path(&pending);
                // Whatever was watched at the destination was replaced.
                self.registry
                    .remove_subtree(&to, |handle| backend.remove_watch(handle))?;
                let renamed = self.registry.rename_subtree(&from, &to);
                debug!("Renamed {} -> {} ({renamed} watches)", from.display(), to.display());
                if renamed == 0 {
                    self.install_subtree(backend, &to)?;
                }
            }
        }

        self.stats.renames += 1;
        Ok(())
    }

    fn enter_scope<B: NotifyBackend>(&mut self, backend: &mut B, event: &RawEvent) -> Result<()> {
        let Some(path) = self.child_path(event) else {
            return Ok(());
        };
        self.resolve_overlapping(backend, &path)?;

        if self.exclusion.excludes(&path) {
            debug!("Excluded: {}", path.display());
            return Ok(());
        }

        let installed = self.install_subtree(backend, &path)?;
        debug!("New directory {} ({installed} watches)", path.display());
        Ok(())
    }

    /// Where a pending move's directory is recorded now. Renames of its
    /// ancestors may have moved it since it was parked.
    fn current_path(&self, pending: &PendingMove) -> PathBuf {
        pending
            .handle
            .and_then(|handle| self.registry.find_by_handle(handle))
            .map_or_else(|| pending.from.clone(), Path::to_path_buf)
    }

    /// Pending moves whose directory contains the watch `event` arrived on.
    fn pending_enclosing(&self, event: &RawEvent) -> Vec<Option<u32>> {
        let Some(dir) = event.handle.and_then(|h| self.registry.find_by_handle(h)) else {
            return Vec::new();
        };

        self.pending
            .iter()
            .filter(|(_, pending)| dir.starts_with(self.current_path(pending)))
            .map(|(cookie, _)| *cookie)
            .collect()
    }

    /// A path is about to be registered: any parked move whose source
    /// overlaps it has certainly left.
    fn resolve_overlapping<B: NotifyBackend>(&mut self, backend: &mut B, path: &Path) -> Result<()> {
        let overlapping: Vec<Option<u32>> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                let from = self.current_path(pending);
                from.starts_with(path) || path.starts_with(&from)
            })
            .map(|(cookie, _)| *cookie)
            .collect();

        for cookie in overlapping {
            self.resolve_exit(backend, cookie)?;
        }
        Ok(())
    }

    fn resolve_exit<B: NotifyBackend>(&mut self, backend: &mut B, cookie: Option<u32>) -> Result<()> {
        match self.pending.shift_remove(&cookie) {
            Some(pending) => self.exit(backend, pending),
            None => Ok(()),
        }
    }

    fn exit<B: NotifyBackend>(&mut self, backend: &mut B, pending: PendingMove) -> Result<()> {
        let path = self.current_path(&pending);
        let removed = self
            .registry
            .remove_subtree(&path, |handle| backend.remove_watch(handle))?;

        debug!("Moved out of tree: {} ({removed} watches)", path.display());
        self.stats.exits += 1;
        Ok(())
    }

    fn overflow<B: NotifyBackend>(&mut self, backend: &mut B) -> Result<()> {
        match self.on_overflow {
            OverflowPolicy::Fail => {
                error!("Event queue overflow: events were lost");
                Err(WatchError::QueueOverflow)
            }
            OverflowPolicy::Rescan => {
                warn!("Event queue overflow: rebuilding watches from {}", self.root.display());
                self.teardown(backend)?;
                let installed = self.install_root(backend)?;
                info!("Rescan installed {installed} watches");
                self.stats.rescans += 1;
                Ok(())
            }
        }
    }

    fn forward<S: EventSink + ?Sized>(&mut self, event: &RawEvent, sink: &mut S) -> Result<()> {
        let Some(kind) = kind_label(event.kinds, event.is_directory) else {
            return Ok(());
        };

        // The parent's watch reports the same change under the child's name.
        let Some(name) = &event.name else {
            trace!("Dropping unnamed {kind}");
            return Ok(());
        };

        // A child event can race the teardown of a parent that just moved out.
        let Some(dir) = event.handle.and_then(|h| self.registry.find_by_handle(h)) else {
            trace!("Dropping {kind} for a retired watch");
            self.stats.dropped += 1;
            return Ok(());
        };

        let path = dir.join(name);
        self.stats.forwarded += 1;
        sink.emit(NormalizedEvent::new(path, kind, event.is_directory))
    }
}

fn completes_cookieless_move(event: &RawEvent) -> bool {
    event.is_directory && event.is(EventKinds::MOVED_TO) && event.cookie.is_none()
}
