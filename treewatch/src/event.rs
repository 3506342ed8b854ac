//! Raw backend events and the normalized events emitted to the feed.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

/// Opaque identifier for one directory subscription.
///
/// Handles are issued by the backend and are only unique while the watch
/// is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatchHandle(u64);

impl WatchHandle {
    /// Wrap a raw backend id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw backend id.
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WatchHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "watch #{}", self.0)
    }
}

bitflags! {
    /// What happened to a filesystem object. Several kinds can be set on
    /// one event.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EventKinds: u32 {
        const CREATED = 1 << 0;
        const REMOVED = 1 << 1;
        const MODIFIED = 1 << 2;
        const CLOSED_AFTER_WRITE = 1 << 3;
        const CLOSED_NO_WRITE = 1 << 4;
        const OPENED = 1 << 5;
        const ACCESSED = 1 << 6;
        const MOVED_FROM = 1 << 7;
        const MOVED_TO = 1 << 8;
        const ATTRIBUTE_CHANGED = 1 << 9;
        /// The backend dropped the handle on its own.
        const WATCH_RETIRED = 1 << 10;
        /// The backend lost an unknown number of events.
        const QUEUE_OVERFLOW = 1 << 11;
    }
}

/// Label token for each reportable kind, in output order.
const LABEL_TOKENS: &[(EventKinds, &str)] = &[
    (EventKinds::CREATED, "CREATE"),
    (EventKinds::REMOVED, "DELETE"),
    (EventKinds::MODIFIED, "MODIFY"),
    (EventKinds::ATTRIBUTE_CHANGED, "ATTRIB"),
    (EventKinds::OPENED, "OPEN"),
    (EventKinds::ACCESSED, "ACCESS"),
    (EventKinds::CLOSED_AFTER_WRITE, "CLOSE_WRITE"),
    (EventKinds::CLOSED_NO_WRITE, "CLOSE_NOWRITE"),
    (EventKinds::MOVED_FROM, "MOVED_FROM"),
    (EventKinds::MOVED_TO, "MOVED_TO"),
];

/// Build the feed label for a set of kinds, e.g. `CREATE` or `MOVED_TO_DIR`.
///
/// Returns `None` when no reportable kind is set.
pub fn kind_label(kinds: EventKinds, is_directory: bool) -> Option<String> {
    let tokens: Vec<&str> = LABEL_TOKENS
        .iter()
        .filter(|(kind, _)| kinds.contains(*kind))
        .map(|(_, token)| *token)
        .collect();

    if tokens.is_empty() {
        return None;
    }

    let mut label = tokens.join("|");
    if is_directory {
        label.push_str("_DIR");
    }
    Some(label)
}

/// One event as delivered by a notification backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Watch the event was reported on. `None` for queue overflow and for
    /// descriptors the backend no longer tracks.
    pub handle: Option<WatchHandle>,

    /// What happened.
    pub kinds: EventKinds,

    /// Whether the subject is a directory.
    pub is_directory: bool,

    /// Name of the child the event is about, relative to the watched
    /// directory. `None` when the event concerns the directory itself.
    pub name: Option<OsString>,

    /// Correlation token shared by the two halves of a move.
    pub cookie: Option<u32>,
}

impl RawEvent {
    /// Create an event about a named child of a watched directory.
    pub fn new(handle: WatchHandle, kinds: EventKinds, name: impl Into<OsString>) -> Self {
        Self {
            handle: Some(handle),
            kinds,
            is_directory: false,
            name: Some(name.into()),
            cookie: None,
        }
    }

    /// Create an event about the watched directory itself.
    pub fn on_watch(handle: WatchHandle, kinds: EventKinds) -> Self {
        Self {
            handle: Some(handle),
            kinds,
            is_directory: false,
            name: None,
            cookie: None,
        }
    }

    /// The backend-wide overflow marker.
    pub fn overflow() -> Self {
        Self {
            handle: None,
            kinds: EventKinds::QUEUE_OVERFLOW,
            is_directory: false,
            name: None,
            cookie: None,
        }
    }

    /// Mark the subject as a directory.
    pub fn dir(mut self) -> Self {
        self.is_directory = true;
        self
    }

    /// Attach a move cookie.
    pub fn with_cookie(mut self, cookie: u32) -> Self {
        self.cookie = Some(cookie);
        self
    }

    /// Check if any of the given kinds is set.
    pub fn is(&self, kinds: EventKinds) -> bool {
        self.kinds.intersects(kinds)
    }
}

/// A change ready for the output feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// Absolute path of the affected object.
    #[serde(serialize_with = "serialize_lossy")]
    pub path: PathBuf,

    /// Feed label, e.g. `CLOSE_WRITE` or `CREATE_DIR`.
    pub kind: String,

    /// Whether the subject is a directory.
    pub is_directory: bool,

    /// When the event was normalized.
    pub timestamp: DateTime<Utc>,
}

impl NormalizedEvent {
    /// Create a new normalized event.
    pub fn new(path: impl Into<PathBuf>, kind: impl Into<String>, is_directory: bool) -> Self {
        Self {
            path: path.into(),
            kind: kind.into(),
            is_directory,
            timestamp: Utc::now(),
        }
    }
}

fn serialize_lossy<S: Serializer>(path: &Path, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&path.to_string_lossy())
}
