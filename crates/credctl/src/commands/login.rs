//! `credctl login`: interactive authentication on the client side.
//!
//! The daemon has no terminal or browser, so logins run here against a
//! locally built instance of the provider. The resulting tokens are then
//! pushed to the daemon's instance with `set_tokens`.

use std::process::ExitCode;

use anyhow::{anyhow, Context as _, Result};
use credctl_core::protocol::{Action, DescribeResponsePayload, Metadata, NamePayload};
use credctl_providers::Provider;

use super::{block_on, token_payload, Context};
use crate::client::Client;

pub fn run(ctx: &Context, name: &str) -> Result<ExitCode> {
    let client = ctx.client();
    let (provider_type, metadata) = resolve(ctx, client.as_ref().ok(), name)?;

    let mut provider = block_on(async {
        let mut provider = ctx
            .registry
            .build(&provider_type, &metadata)
            .await
            .with_context(|| format!("failed to initialize provider '{}'", name))?;
        login(name, provider.as_mut()).await?;
        Ok::<_, anyhow::Error>(provider)
    })??;

    match &client {
        Ok(client) => push_tokens(client, name, provider.as_mut()),
        Err(e) => eprintln!("Warning: tokens not sent to the daemon: {:#}", e),
    }

    println!("Login successful for provider '{}'", name);
    Ok(ExitCode::SUCCESS)
}

/// Type and configuration of `name`: from the daemon if reachable, else
/// from the provider records on disk.
fn resolve(ctx: &Context, client: Option<&Client>, name: &str) -> Result<(String, Metadata)> {
    if let Some(client) = client {
        match client.call_for::<DescribeResponsePayload>(Action::Describe, NamePayload::new(name)) {
            Ok(described) => return Ok((described.provider_type, described.metadata)),
            Err(e) => tracing::debug!(error = %e, "describe failed, reading provider from disk"),
        }
    }

    let record = ctx
        .store()
        .load(name)
        .with_context(|| format!("provider '{}' not found", name))?;
    Ok((record.provider_type, record.data))
}

/// Run the provider's login capability.
pub async fn login(name: &str, provider: &mut dyn Provider) -> Result<()> {
    let provider_type = provider.type_name();
    let login = provider.as_login().ok_or_else(|| {
        anyhow!(
            "provider '{}' (type: {}) does not support login",
            name,
            provider_type
        )
    })?;
    login
        .login()
        .await
        .with_context(|| format!("login failed for provider '{}'", name))
}

/// Hand the tokens of a freshly logged-in provider to the daemon. Failure
/// only warns: the login itself succeeded.
pub fn push_tokens(client: &Client, name: &str, provider: &mut dyn Provider) {
    let Some(payload) = token_payload(name, provider) else {
        return;
    };
    if let Err(e) = client.call(Action::SetTokens, payload) {
        eprintln!("Warning: failed to send tokens to the daemon: {:#}", e);
    }
}
