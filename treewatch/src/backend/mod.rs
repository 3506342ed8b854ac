//! Contract over the OS change-notification facility.
//!
//! A backend owns one notification session. It installs and releases
//! per-directory watches and hands out raw events in delivery order.

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{RawEvent, WatchHandle};

#[cfg(target_os = "linux")]
pub mod inotify;

#[cfg(target_os = "linux")]
pub use self::inotify::InotifyBackend;

/// One open notification session.
#[async_trait]
pub trait NotifyBackend: Send {
    /// Get the name of this backend.
    fn name(&self) -> &str;

    /// Request change notifications for one directory.
    ///
    /// Watching a directory that is already watched returns its existing
    /// handle.
    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle>;

    /// Release a watch. Releasing a handle the backend already retired
    /// succeeds.
    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()>;

    /// Pull the events buffered right now without blocking.
    ///
    /// An empty result means nothing is available yet, not end of stream.
    fn poll_events(&mut self) -> Result<Vec<RawEvent>>;

    /// Wait until events may be available.
    async fn readable(&mut self) -> Result<()>;

    /// Close the session, releasing every watch.
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
