//! Mediaopt CLI - incremental image and video optimization for static sites.
//!
//! Mediaopt scans a project's asset roots, recompresses images, adds WebP
//! siblings and transcodes videos, skipping every asset whose content has not
//! changed since the last run.
//!
//! # Usage
//!
//! ```bash
//! # Optimize ./public into ./public/optimized
//! mediaopt
//!
//! # Another project, extra renditions, machine-readable summary
//! mediaopt run --project ../site --webm --abr --summary-format json
//!
//! # View configuration
//! mediaopt config show
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;
mod logging;

/// Mediaopt - incremental image and video optimization for static sites.
#[derive(Parser, Debug)]
#[command(name = "mediaopt")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, env = "MEDIAOPT_CONFIG")]
    config: Option<PathBuf>,

    /// Defaults to `run` when omitted
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Optimize every asset under the source roots
    Run(cli::run::RunArgs),

    /// View and manage configuration
    Config(cli::config::ConfigArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logging isn't initialized yet, so use eprintln for config warnings.
    let loaded = mediaopt_core::Config::load_layered(cli.config.as_deref());
    match &loaded {
        Ok(config) => logging::init_from_config(config, cli.verbose, cli.json_logs),
        Err(e) => {
            eprintln!(
                "Warning: Failed to load config: {e}\n  \
                 Check your config file with `mediaopt config path`."
            );
            logging::init(cli.verbose, cli.json_logs);
        }
    }

    tracing::debug!("Mediaopt v{}", mediaopt_core::VERSION);

    match cli.command.unwrap_or(Commands::Run(Default::default())) {
        Commands::Run(args) => cli::run::execute(args, loaded?).await,
        Commands::Config(args) => cli::config::execute(args, loaded, cli.config).await,
    }
}
