//! CLI definitions for TaskHive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use taskhive_queue::TaskStatus;

/// TaskHive CLI.
#[derive(Parser)]
#[command(name = "taskhive")]
#[command(about = "Priority-aware background task queue")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml", global = true)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the queue in foreground until Ctrl-C (default)
    Run {
        /// Seconds to wait for running tasks on shutdown
        #[arg(long, default_value_t = 30)]
        shutdown_timeout: u64,
    },

    /// Enqueue demo tasks, wait for them to settle and print stats
    Demo {
        /// Number of tasks to enqueue
        #[arg(short = 'n', long, default_value_t = 12)]
        count: usize,

        /// Give up waiting after this many seconds
        #[arg(long, default_value_t = 60)]
        wait: u64,
    },

    /// Validate the configuration file
    Validate,

    /// List tasks persisted in the configured store
    Tasks {
        /// Only show tasks with this status
        #[arg(short, long)]
        status: Option<TaskStatus>,

        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}
