//! CLI argument types

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "meridian")]
#[command(about = "Personal telemetry pipeline", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler and worker pool
    Serve {
        /// Worker pool size
        #[arg(long, default_value_t = 4)]
        workers: usize,
    },

    /// Sync one pull stream now
    Sync {
        /// Stream name (e.g. google_calendar)
        stream: String,
    },

    /// Process one stored raw batch
    Process {
        /// Stream name the batch belongs to
        stream: String,
        /// Object-store key of the batch
        object_key: String,
    },

    /// Run transition detection for a local day
    Detect {
        /// Local date (YYYY-MM-DD); defaults to yesterday
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Restrict to one signal
        #[arg(long)]
        signal: Option<String>,
    },

    /// Segment a local day into events
    Segment {
        /// Local date (YYYY-MM-DD); defaults to yesterday
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Registry inspection
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },

    /// Show task counters
    Status,
}

#[derive(Subcommand)]
pub enum RegistryAction {
    /// Validate the sources tree and print a summary
    Validate {
        /// Registry root (defaults to MERIDIAN_SOURCES_DIR or ./sources)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// List sources, streams, and signals
    List,
}
