//! credctld - credential broker daemon.
//!
//! Serves configured providers over `<data_dir>/agent.sock` (full access)
//! and `<data_dir>/agent-readonly.sock` (get, list and describe only).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use credctl_core::{Config, Paths};
use tracing::{debug, error, info};

/// Local credential broker daemon.
#[derive(Parser)]
#[command(name = "credctld")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: ~/.credctl/config.toml]
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory for sockets and provider records [default: ~/.credctl]
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Only show errors
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    credctld::logging::init(credctld::logging::level(cli.verbose, cli.quiet));

    info!(version = env!("CARGO_PKG_VERSION"), "Starting credctld");

    let config = match &cli.config {
        Some(path) => {
            info!(path = %path.display(), "Loading configuration from specified path");
            Config::load_from(path).context("Failed to load configuration")?
        }
        None => {
            let config = Config::load().context("Failed to load configuration")?;
            match Config::default_path() {
                Some(path) if path.exists() => info!(path = %path.display(), "Loaded configuration"),
                _ => debug!("No config file found, using defaults"),
            }
            config
        }
    };

    let paths = match cli.data_dir {
        Some(dir) => Paths::new(dir),
        None => config.paths().context("Failed to resolve data directory")?,
    };
    info!(data_dir = %paths.root().display(), "Using data directory");

    if let Err(e) = credctld::serve(&config, &paths).await {
        error!(error = %e, "Daemon error");
        return Err(e);
    }

    info!("credctld stopped");
    Ok(())
}
