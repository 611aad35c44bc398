//! TaskHive - priority-aware background task queue
//!
//! Main entry point for the TaskHive CLI.

mod cli;
mod cmd_tasks;
mod handlers;
mod server;

use clap::Parser;

use taskhive_config::ConfigLoader;

use crate::cli::{Cli, Commands};
use crate::cmd_tasks::{list_tasks, run_demo, validate_config};
use crate::server::{init_tracing, run_server};

const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // `validate` reports problems instead of failing on them
    if let Some(Commands::Validate) = cli.command {
        return validate_config(&cli.config);
    }

    let config = ConfigLoader::load_or_default(&cli.config)?;
    init_tracing(&config.logging)?;

    match cli.command {
        None => run_server(config, DEFAULT_SHUTDOWN_TIMEOUT_SECS).await,
        Some(Commands::Run { shutdown_timeout }) => run_server(config, shutdown_timeout).await,
        Some(Commands::Demo { count, wait }) => run_demo(config, count, wait).await,
        Some(Commands::Tasks { status, format }) => list_tasks(&config, status, &format).await,
        Some(Commands::Validate) => Ok(()),
    }
}
