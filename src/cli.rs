//! Command-line interface definitions.
//!
//! This module defines the CLI arguments and options using the `clap`
//! crate. Subcommands mirror the operator workflow: run one source, run
//! the due set, inspect sources and history, and reset dedup state.

use clap::{Args, Parser, Subcommand};

/// Command-line arguments for the harvester.
///
/// # Examples
///
/// ```sh
/// # Run one source right now, keeping only last night's records
/// news_harvester run odaily --since 2025-10-14T22:00Z --until 2025-10-15T06:00Z
///
/// # Run everything that is due, eight pipelines at a time
/// news_harvester run-all --concurrency 8
///
/// # Forget a source's dedup history
/// news_harvester reset odaily
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Root data directory (sources/, history/, outputs/)
    #[arg(long, env = "NEWS_HARVESTER_HOME", default_value = "./data")]
    pub data_dir: String,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one source immediately
    Run {
        /// Source name as declared in its definition file
        name: String,
        #[command(flatten)]
        window: WindowArgs,
        /// Suppress progress logging; counts are unaffected
        #[arg(long)]
        quiet: bool,
    },
    /// Run every due source under the bounded worker pool
    RunAll {
        /// Ignore schedules and run every valid source
        #[arg(long)]
        force: bool,
        /// Worker pool capacity (defaults to the global configuration)
        #[arg(long)]
        concurrency: Option<usize>,
        #[command(flatten)]
        window: WindowArgs,
        /// Suppress progress logging; counts are unaffected
        #[arg(long)]
        quiet: bool,
    },
    /// List configured sources and any excluded definitions
    List,
    /// Show a source's most recent history ledger entries
    History {
        name: String,
        /// Number of entries to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Clear one source's dedup history
    Reset { name: String },
    /// Clear every source's dedup history and the outputs directory
    ResetAll,
}

/// Time-window options shared by `run` and `run-all`.
#[derive(Args, Debug, Default)]
pub struct WindowArgs {
    /// Keep only records at or after this instant (ISO-8601, e.g. 2025-10-15T02:00+08:00)
    #[arg(long, value_name = "TIMESTAMP")]
    pub since: Option<String>,

    /// Keep only records before this instant (ISO-8601; defaults to now)
    #[arg(long, value_name = "TIMESTAMP")]
    pub until: Option<String>,

    /// Recurring daily window start (HH:MM); resolves to the most recent past occurrence
    #[arg(long, value_name = "HH:MM")]
    pub window_start: Option<String>,

    /// Window span (plain hours, or 90m / 36h / 1d6h; default 24h)
    #[arg(long, value_name = "SPAN")]
    pub window_duration: Option<String>,
}

impl Cli {
    /// Whether the selected subcommand asked for quiet output.
    pub fn quiet(&self) -> bool {
        match &self.command {
            Command::Run { quiet, .. } | Command::RunAll { quiet, .. } => *quiet,
            _ => false,
        }
    }
}
