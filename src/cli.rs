//! CLI definitions for doccron.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// doccron CLI.
#[derive(Parser)]
#[command(name = "doccron")]
#[command(about = "Cron-style job queue on top of a document collection")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path (default: ~/.doccron/config.toml)
    #[arg(short, long, global = true, env = "DOCCRON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `store.path`
    #[arg(long, global = true, env = "DOCCRON_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run a worker in the foreground until Ctrl-C
    Run,

    /// Add a job
    Add(AddArgs),

    /// List jobs
    List {
        /// Include documents that are no longer jobs
        #[arg(long)]
        all: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Remove a document by id
    Remove {
        /// Document id
        id: String,
    },

    /// Print upcoming occurrences of an interval expression
    Next {
        /// Six-field expression, e.g. "0 */5 * * * *"
        expression: String,

        /// Number of occurrences to print
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,

        /// Reference instant (RFC 3339, default: now)
        #[arg(long)]
        after: Option<String>,
    },
}

#[derive(Args)]
pub(crate) struct AddArgs {
    /// Interval expression; makes the job recurring
    #[arg(short, long)]
    pub interval: Option<String>,

    /// Last instant a recurring job may run (RFC 3339)
    #[arg(long)]
    pub repeat_until: Option<String>,

    /// Delete the document once the job is finished
    #[arg(long)]
    pub auto_remove: bool,

    /// First run (RFC 3339, default: immediately)
    #[arg(long)]
    pub at: Option<String>,

    /// JSON object stored alongside the scheduling fields
    #[arg(short, long, default_value = "{}")]
    pub payload: String,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Table,
    Json,
}
