//! Configuration types for a watch session.

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchError};
use crate::exclusion::ExclusionFilter;

/// Configuration for one watched tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Root of the watched tree.
    pub root: PathBuf,

    /// Directory basenames that are never watched.
    pub exclude: Vec<String>,

    /// How events are written.
    pub format: OutputFormat,

    /// What to do when the backend drops events.
    pub on_overflow: OverflowPolicy,

    /// Whether stdin controls shutdown (end of input or any line).
    pub stdin_control: bool,
}

impl WatchConfig {
    /// Create a new config for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            exclude: Vec::new(),
            format: OutputFormat::default(),
            on_overflow: OverflowPolicy::default(),
            stdin_control: true,
        }
    }

    /// Add an excluded basename.
    pub fn exclude(mut self, name: impl Into<String>) -> Self {
        self.exclude.push(name.into());
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the overflow policy.
    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.on_overflow = policy;
        self
    }

    /// Stop listening on stdin for shutdown.
    pub fn without_stdin_control(mut self) -> Self {
        self.stdin_control = false;
        self
    }

    /// Build the exclusion filter.
    pub fn exclusion_filter(&self) -> ExclusionFilter {
        ExclusionFilter::new(&self.exclude)
    }

    /// Check the config and make the root absolute.
    ///
    /// Symlinks in the root are kept as written.
    pub fn validate(mut self) -> Result<Self> {
        if let Some(name) = self.exclude.iter().find(|name| !is_basename(name)) {
            return Err(WatchError::Config(format!(
                "exclude must be a plain directory name: {name}"
            )));
        }

        let root = std::path::absolute(&self.root).map_err(|e| {
            WatchError::Config(format!("cannot resolve {}: {e}", self.root.display()))
        })?;
        if !root.exists() {
            return Err(WatchError::DirectoryNotFound(root.display().to_string()));
        }
        if !root.is_dir() {
            return Err(WatchError::NotADirectory(root.display().to_string()));
        }

        self.root = root;
        Ok(self)
    }
}

fn is_basename(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}

/// How events are written to stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `path,KIND` lines with CSV quoting.
    #[default]
    Csv,

    /// One JSON object per line.
    Json,
}

/// Response to a backend queue overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Stop with an error.
    #[default]
    Fail,

    /// Drop all watches and rebuild them from the root.
    Rescan,
}
