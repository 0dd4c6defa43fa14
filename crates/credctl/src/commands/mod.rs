//! Subcommand implementations.

pub mod add;
pub mod backup;
pub mod daemon;
pub mod get;
pub mod login;
pub mod providers;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use credctl_core::protocol::SetTokensPayload;
use credctl_core::{Config, Paths, ProviderStore};
use credctl_providers::{Provider, Registry};

use crate::client::{discover_socket, socket_from_env, Client};

/// What every subcommand needs: configuration, layout and provider types.
pub struct Context {
    pub config: Config,
    pub config_path: Option<PathBuf>,
    pub paths: Paths,
    pub registry: Registry,
}

impl Context {
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let config = match &config_path {
            Some(path) => Config::load_from(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => Config::load().context("Failed to load configuration")?,
        };
        let paths = config.paths().context("Failed to resolve data directory")?;
        Ok(Self {
            config,
            config_path,
            paths,
            registry: Registry::with_builtin(),
        })
    }

    /// Client for the discovered daemon socket.
    pub fn client(&self) -> Result<Client> {
        discover_socket(
            socket_from_env(),
            self.config.client.socket.as_deref(),
            &self.paths,
        )
        .map(Client::new)
    }

    pub fn store(&self) -> ProviderStore {
        ProviderStore::new(self.paths.providers_dir())
    }
}

/// Run `future` on a fresh single-threaded runtime.
pub fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}

/// The tokens a local provider instance holds, as a `set_tokens` payload.
pub fn token_payload(name: &str, provider: &mut dyn Provider) -> Option<SetTokensPayload> {
    let tokens = provider.as_token_cache()?.tokens()?;
    Some(SetTokensPayload {
        name: name.to_string(),
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
    })
}
