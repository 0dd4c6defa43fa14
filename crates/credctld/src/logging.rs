//! Log setup shared by `credctld` and `credctl daemon --foreground`.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map `-v`/`-q` flags to a filter level.
pub fn level(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `default_level`.
///
/// Under systemd (`JOURNAL_STREAM` set) records go to journald so levels
/// survive; otherwise they are written to stderr.
pub fn init(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if std::env::var_os("JOURNAL_STREAM").is_some() {
        if let Ok(journald) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(journald)
                .with(filter)
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}
