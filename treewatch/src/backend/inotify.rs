//! Linux inotify backend.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use inotify::{Event, EventMask, Inotify, WatchDescriptor, WatchMask, Watches};
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

use super::NotifyBackend;
use crate::error::{Result, WatchError};
use crate::event::{EventKinds, RawEvent, WatchHandle};

/// Size of the read buffer. Fits at least one event with a maximal name.
const BUFFER_SIZE: usize = 4096;

/// Kernel bits mapped onto event kinds.
const MASK_KINDS: &[(EventMask, EventKinds)] = &[
    (EventMask::CREATE, EventKinds::CREATED),
    (EventMask::DELETE, EventKinds::REMOVED),
    (EventMask::MODIFY, EventKinds::MODIFIED),
    (EventMask::CLOSE_WRITE, EventKinds::CLOSED_AFTER_WRITE),
    (EventMask::CLOSE_NOWRITE, EventKinds::CLOSED_NO_WRITE),
    (EventMask::OPEN, EventKinds::OPENED),
    (EventMask::ACCESS, EventKinds::ACCESSED),
    (EventMask::MOVED_FROM, EventKinds::MOVED_FROM),
    (EventMask::MOVED_TO, EventKinds::MOVED_TO),
    (EventMask::ATTRIB, EventKinds::ATTRIBUTE_CHANGED),
    (EventMask::IGNORED, EventKinds::WATCH_RETIRED),
    (EventMask::Q_OVERFLOW, EventKinds::QUEUE_OVERFLOW),
];

fn watch_mask() -> WatchMask {
    WatchMask::MODIFY
        | WatchMask::CLOSE_WRITE
        | WatchMask::MOVED_FROM
        | WatchMask::MOVED_TO
        | WatchMask::CREATE
        | WatchMask::DELETE
        | WatchMask::ATTRIB
}

/// Two-way map between kernel descriptors and the handles we hand out.
#[derive(Debug, Default)]
struct DescriptorTable {
    handles: HashMap<WatchDescriptor, WatchHandle>,
    descriptors: HashMap<WatchHandle, WatchDescriptor>,
    next_id: u64,
}

impl DescriptorTable {
    fn register(&mut self, wd: WatchDescriptor) -> WatchHandle {
        if let Some(handle) = self.handles.get(&wd) {
            return *handle;
        }

        self.next_id += 1;
        let handle = WatchHandle::new(self.next_id);
        self.handles.insert(wd.clone(), handle);
        self.descriptors.insert(handle, wd);
        handle
    }

    fn forget(&mut self, handle: WatchHandle) -> Option<WatchDescriptor> {
        let wd = self.descriptors.remove(&handle)?;
        self.handles.remove(&wd);
        Some(wd)
    }

    fn translate(&mut self, event: Event<&OsStr>) -> RawEvent {
        let handle = self.handles.get(&event.wd).copied();

        let kinds = MASK_KINDS
            .iter()
            .filter(|(bit, _)| event.mask.contains(*bit))
            .fold(EventKinds::empty(), |acc, (_, kind)| acc | *kind);

        if kinds.contains(EventKinds::WATCH_RETIRED) {
            if let Some(handle) = handle {
                trace!("kernel retired {handle}");
                self.forget(handle);
            }
        }

        RawEvent {
            handle,
            kinds,
            is_directory: event.mask.contains(EventMask::ISDIR),
            name: event.name.map(OsStr::to_os_string),
            cookie: (event.cookie != 0).then_some(event.cookie),
        }
    }
}

/// Notification session backed by one inotify instance.
pub struct InotifyBackend {
    /// The inotify descriptor, registered with the tokio reactor.
    fd: AsyncFd<Inotify>,

    /// Handle for adding and removing watches.
    watches: Watches,

    /// Descriptor bookkeeping.
    table: DescriptorTable,

    /// Read buffer reused across polls.
    buffer: Vec<u8>,
}

impl InotifyBackend {
    /// Open a new inotify session.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open() -> Result<Self> {
        let inotify = Inotify::init().map_err(WatchError::SessionInit)?;
        let watches = inotify.watches();
        let fd = AsyncFd::new(inotify).map_err(WatchError::SessionInit)?;

        debug!("Opened inotify session");
        Ok(Self {
            fd,
            watches,
            table: DescriptorTable::default(),
            buffer: vec![0; BUFFER_SIZE],
        })
    }

    /// Number of descriptors currently held.
    pub fn watch_count(&self) -> usize {
        self.table.descriptors.len()
    }
}

#[async_trait]
impl NotifyBackend for InotifyBackend {
    fn name(&self) -> &str {
        "inotify"
    }

    fn add_watch(&mut self, path: &Path) -> Result<WatchHandle> {
        let wd = self
            .watches
            .add(path, watch_mask())
            .map_err(|source| WatchError::AddWatch {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(self.table.register(wd))
    }

    fn remove_watch(&mut self, handle: WatchHandle) -> Result<()> {
        let Some(wd) = self.table.forget(handle) else {
            debug!("{handle} already retired");
            return Ok(());
        };

        match self.watches.remove(wd) {
            Ok(()) => Ok(()),
            // The kernel dropped it first; the IGNORED event is still queued.
            Err(source) if source.kind() == io::ErrorKind::InvalidInput => {
                debug!("{handle} retired by the kernel before removal");
                Ok(())
            }
            Err(source) => Err(WatchError::RemoveWatch { handle, source }),
        }
    }

    fn poll_events(&mut self) -> Result<Vec<RawEvent>> {
        let mut raw = Vec::new();

        loop {
            let events = match self.fd.get_mut().read_events(&mut self.buffer) {
                Ok(events) => events,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WatchError::ReadEvents(e)),
            };

            let before = raw.len();
            for event in events {
                raw.push(self.table.translate(event));
            }
            if raw.len() == before {
                break;
            }
        }

        Ok(raw)
    }

    async fn readable(&mut self) -> Result<()> {
        let mut guard = self
            .fd
            .readable_mut()
            .await
            .map_err(WatchError::ReadEvents)?;
        // Every caller drains until the read would block.
        guard.clear_ready();
        Ok(())
    }

    fn close(self) -> Result<()> {
        debug!("Closing inotify session with {} watches", self.watch_count());
        self.fd
            .into_inner()
            .close()
            .map_err(WatchError::SessionClose)
    }
}
