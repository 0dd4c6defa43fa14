//! The credctl daemon.
//!
//! Holds live providers in memory and serves them over an admin socket and
//! a read-only socket. The read-only socket is meant to be forwarded to
//! other machines: it can fetch credentials but never add, remove or
//! modify providers.

pub mod daemon;
pub mod handlers;
pub mod logging;
pub mod socket;
pub mod state;

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::sync::Arc;

use anyhow::Context;
use credctl_core::{Config, Paths, ProviderStore};
use credctl_providers::Registry;
use tracing::info;

pub use daemon::{shutdown_signal, Daemon};
pub use handlers::{handle, Access};
pub use socket::{StaleSocket, UnixSocketProvider};
pub use state::{SharedProvider, State, StateError};

/// Load providers from `paths`, bind the sockets and serve until a
/// shutdown signal arrives.
pub async fn serve(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let root = paths.root();
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(root)
        .with_context(|| format!("Failed to create data directory {}", root.display()))?;
    std::fs::set_permissions(root, std::fs::Permissions::from_mode(0o700))
        .with_context(|| format!("Failed to restrict data directory {}", root.display()))?;

    let registry = Arc::new(Registry::with_builtin());
    info!(types = ?registry.list_types(), "Provider types registered");

    let state = Arc::new(State::new(
        ProviderStore::new(paths.providers_dir()),
        registry,
    ));
    state
        .load_all()
        .await
        .context("Failed to load providers")?;

    let mut daemon = Daemon::new(state, UnixSocketProvider::admin(paths.admin_socket()))
        .with_get_timeout(config.request_timeout());
    if config.daemon.readonly_socket {
        daemon = daemon.with_readonly_socket(UnixSocketProvider::readonly(paths.readonly_socket()));
    }

    daemon.run().await
}
