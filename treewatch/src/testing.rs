//! In-memory backend for driving the normalizer in tests.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::backend::NotifyBackend;
use crate::error::{Result, WatchError};
use crate::event::{RawEvent, WatchHandle};

/// Backend that records watch calls and replays queued batches.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    /// Paths passed to `add_watch`, in call order.
    pub added: Vec<PathBuf>,

    /// Handles passed to `remove_watch`, in call order.
    pub removed: Vec<WatchHandle>,

    live: HashMap<PathBuf, WatchHandle>,
    failures: HashMap<PathBuf, io::ErrorKind>,
    batches: VecDeque<Vec<RawEvent>>,
    next_id: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `add_watch` on `path` fail with `kind`.
    pub fn fail_add(&mut self, path: impl Into<PathBuf>, kind: io::ErrorKind) {
        self.failures.insert(path.into(), kind);
    }

    /// Queue a batch for `poll_events`.
    pub fn push_batch(&mut self, events: Vec<RawEvent>) {
        self.batches.push_back(events);
    }
}

#[async_trait]
impl NotifyBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle> {
        if let Some(kind) = self.failures.get(path) {
            return Err(WatchError::AddWatch {
                path: path.to_path_buf(),
                source: io::Error::from(*kind),
            });
        }

        self.added.push(path.to_path_buf());
        if let Some(handle) = self.live.get(path) {
            return Ok(*handle);
        }

        self.next_id += 1;
        let handle = WatchHandle::new(self.next_id);
        self.live.insert(path.to_path_buf(), handle);
        Ok(handle)
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        self.removed.push(handle);
        self.live.retain(|_, live| *live != handle);
        Ok(())
    }

    fn poll_events(&mut self) -> Result<Vec<RawEvent>> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }

    async fn readable(&mut self) -> Result<()> {
        if self.batches.is_empty() {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    fn close(self) -> Result<()> {
        Ok(())
    }
}
