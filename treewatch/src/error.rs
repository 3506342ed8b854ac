//! Error types for the tree watcher.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::event::WatchHandle;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, WatchError>;

/// Errors that can occur while watching a tree.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The notification session could not be created.
    #[error("failed to open notification session: {0}")]
    SessionInit(#[source] io::Error),

    /// The notification session could not be closed cleanly.
    #[error("failed to close notification session: {0}")]
    SessionClose(#[source] io::Error),

    /// A watch could not be installed on a directory.
    #[error("cannot watch '{}': {source}", path.display())]
    AddWatch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A watch could not be released.
    #[error("cannot unwatch {handle}: {source}")]
    RemoveWatch {
        handle: WatchHandle,
        #[source]
        source: io::Error,
    },

    /// Reading from the notification session failed.
    #[error("failed to read events: {0}")]
    ReadEvents(#[source] io::Error),

    /// Directory traversal failed.
    #[error("cannot traverse '{}': {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    /// The backend dropped events.
    #[error("event queue overflow: events were lost")]
    QueueOverflow,

    /// Root directory not found.
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    /// Root is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Writing the change feed failed.
    #[error("output error: {0}")]
    Output(#[from] io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl WatchError {
    /// Whether this error means the target vanished before it could be
    /// watched or traversed. A concurrent delete retires those watches on
    /// its own, so callers treat this as a no-op.
    pub fn is_vanished(&self) -> bool {
        match self {
            Self::AddWatch { source, .. } => source.kind() == io::ErrorKind::NotFound,
            Self::Walk { source, .. } => source
                .io_error()
                .is_some_and(|e| e.kind() == io::ErrorKind::NotFound),
            _ => false,
        }
    }
}
