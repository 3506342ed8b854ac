//! Command-line arguments.

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use treewatch::{OutputFormat, OverflowPolicy, WatchConfig};

/// Recursively watch a directory and print one line per change.
///
/// Lines are `<path>,<KIND>` on stdout. The watcher stops when stdin
/// reaches end of input or receives a line.
#[derive(Debug, Parser)]
#[command(name = "treewatch", version, about)]
pub struct Cli {
    /// Directory to watch.
    pub root: PathBuf,

    /// Directory name to skip, with everything beneath it. Repeatable.
    #[arg(short, long, value_name = "NAME")]
    pub exclude: Vec<String>,

    /// Output format.
    #[arg(long, value_enum, default_value = "csv")]
    pub format: OutputFormat,

    /// What to do when the kernel drops events.
    #[arg(long, value_enum, default_value = "fail")]
    pub on_overflow: OverflowPolicy,

    /// Ignore stdin; run until interrupted.
    #[arg(long)]
    pub no_stdin_control: bool,

    /// Increase log verbosity on stderr (-v debug, -vv trace).
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Build the session config.
    pub fn into_config(self) -> WatchConfig {
        let mut config = self
            .exclude
            .into_iter()
            .fold(WatchConfig::new(self.root), WatchConfig::exclude)
            .with_format(self.format)
            .with_overflow_policy(self.on_overflow);
        if self.no_stdin_control {
            config = config.without_stdin_control();
        }
        config
    }

    /// Default log filter for the requested verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}
