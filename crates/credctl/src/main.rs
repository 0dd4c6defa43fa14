//! credctl - command-line client for the credctl credential broker.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon and point the shell at it
//! eval $(credctl daemon)
//!
//! # Register providers
//! credctl add command github --set command="gh auth token"
//! credctl add oauth2 corp --set flow=device --set issuer=https://id.corp.example \
//!     --set client_id=cli --run-login
//!
//! # Fetch credentials
//! credctl get github
//! credctl get corp --format env --env-var CORP_TOKEN
//!
//! # Without a daemon (CI)
//! credctl get command --no-daemon --set command="cat /run/secrets/token"
//! ```

mod client;
mod commands;
mod format;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use crate::format::OutputFormat;

/// Local credential broker.
#[derive(Parser)]
#[command(name = "credctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file [default: ~/.credctl/config.toml]
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (prints shell exports; use with eval)
    Daemon {
        /// Run in the foreground instead of detaching
        #[arg(long, short = 'f')]
        foreground: bool,

        /// Increase log verbosity (-v = debug, -vv = trace)
        #[arg(short, long, action = ArgAction::Count)]
        verbose: u8,

        /// Only log errors
        #[arg(short, long)]
        quiet: bool,
    },

    /// Add a credential provider
    Add {
        /// Provider type (see `credctl types`)
        provider_type: String,

        /// Provider name
        name: String,

        /// Configuration value, repeatable (e.g. --set command="pass show gh")
        #[arg(long = "set", short = 's', value_name = "KEY=VALUE", value_parser = parse_assignment)]
        settings: Vec<(String, String)>,

        /// Replace an existing provider with the same name
        #[arg(long)]
        force: bool,

        /// Log in before adding the provider
        #[arg(long)]
        run_login: bool,
    },

    /// Fetch a credential
    Get {
        /// Provider name (provider type with --no-daemon)
        name: String,

        /// Build the provider from --set values and run it in-process
        #[arg(long)]
        no_daemon: bool,

        /// Provider configuration for --no-daemon, repeatable
        #[arg(long = "set", short = 's', value_name = "KEY=VALUE", value_parser = parse_assignment, requires = "no_daemon")]
        settings: Vec<(String, String)>,

        /// Output format
        #[arg(long, short = 'f', value_enum, default_value_t = OutputFormat::Raw)]
        format: OutputFormat,

        /// Variable name for `--format env` of a single value
        #[arg(long, value_name = "NAME")]
        env_var: Option<String>,
    },

    /// Remove a provider
    #[command(alias = "rm")]
    Delete {
        /// Provider name
        name: String,
    },

    /// List configured providers
    #[command(alias = "ls")]
    List,

    /// Show a provider's configuration (secrets masked)
    Describe {
        /// Provider name
        name: String,
    },

    /// Run the interactive login for a provider and hand its tokens to the daemon
    Login {
        /// Provider name
        name: String,
    },

    /// List provider types and their configuration fields
    Types,

    /// Print all provider records as JSON
    Export,

    /// Add providers from an export (file or `-` for stdin)
    Import {
        /// Input file [default: stdin]
        file: Option<PathBuf>,

        /// Replace providers that already exist
        #[arg(long)]
        overwrite: bool,
    },
}

fn parse_assignment(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = commands::Context::load(cli.config).and_then(|ctx| match cli.command {
        Commands::Daemon {
            foreground,
            verbose,
            quiet,
        } => commands::daemon::run(&ctx, foreground, verbose, quiet),
        Commands::Add {
            provider_type,
            name,
            settings,
            force,
            run_login,
        } => commands::add::run(&ctx, &provider_type, &name, &settings, force, run_login),
        Commands::Get {
            name,
            no_daemon: true,
            settings,
            format,
            env_var,
        } => commands::get::run_inline(&ctx, &name, &settings, format, env_var.as_deref()),
        Commands::Get {
            name,
            format,
            env_var,
            ..
        } => commands::get::run(&ctx, &name, format, env_var.as_deref()),
        Commands::Delete { name } => commands::providers::delete(&ctx, &name),
        Commands::List => commands::providers::list(&ctx),
        Commands::Describe { name } => commands::providers::describe(&ctx, &name),
        Commands::Login { name } => commands::login::run(&ctx, &name),
        Commands::Types => commands::providers::types(&ctx),
        Commands::Export => commands::backup::export(&ctx),
        Commands::Import { file, overwrite } => {
            commands::backup::import(&ctx, file.as_deref(), overwrite)
        }
    });

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
