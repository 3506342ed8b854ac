//! # Tree Watch
//!
//! Recursively watches a directory tree and emits one normalized line per
//! change.
//!
//! The OS reports events per watched directory, keyed by an opaque handle.
//! This crate keeps the handle-to-path bookkeeping consistent while the
//! tree itself is renamed, created, deleted and partially excluded.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         WatchSession                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  NotifyBackend ──► EventNormalizer ──► EventSink (csv / json)   │
//! │       ▲                 │     │                                 │
//! │       │                 ▼     ▼                                 │
//! │  RecursiveWalker ◄── WatchRegistry   ExclusionFilter            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod config;
pub mod csv;
pub mod error;
pub mod event;
pub mod exclusion;
pub mod normalizer;
pub mod output;
pub mod registry;
pub mod session;
pub mod walker;

#[cfg(test)]
mod testing;

pub use backend::NotifyBackend;
#[cfg(target_os = "linux")]
pub use backend::InotifyBackend;
pub use config::{OutputFormat, OverflowPolicy, WatchConfig};
pub use error::{Result, WatchError};
pub use event::{EventKinds, NormalizedEvent, RawEvent, WatchHandle};
pub use exclusion::ExclusionFilter;
pub use normalizer::{EventNormalizer, NormalizerStats, PendingMove};
pub use output::{EventSink, OutputWriter};
pub use registry::WatchRegistry;
pub use session::WatchSession;
pub use walker::RecursiveWalker;
