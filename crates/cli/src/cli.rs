//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quantpipe_core::stage::Stage;

/// Scheduled fetch → process → report pipeline orchestrator.
#[derive(Parser, Debug)]
#[command(name = "quantpipe", version, about)]
pub struct Cli {
    /// Path to the pipeline configuration file.
    #[arg(
        long,
        global = true,
        default_value = "config/pipeline.toml",
        env = "QUANTPIPE_CONFIG"
    )]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one stage now, regardless of its schedule.
    Run {
        /// Stage to run: fetch, process, or report.
        stage: Stage,

        /// Only run these sources (repeatable; default: all enabled).
        #[arg(long = "source")]
        sources: Vec<String>,

        /// Run sources concurrently, overriding the stage config.
        #[arg(long)]
        parallel: bool,
    },

    /// Start the scheduler daemon.
    Daemon,

    /// Validate the configuration file and print a summary.
    Validate,

    /// Show per-stage schedules, next fire times, and source toggles.
    Status {
        /// Also report whether each stage would fire at this instant
        /// (RFC 3339, e.g. 2026-02-10T05:00:00Z).
        #[arg(long)]
        at: Option<chrono::DateTime<chrono::Utc>>,
    },

    /// Show recent runs from the run log.
    History {
        /// Number of runs to show.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}
