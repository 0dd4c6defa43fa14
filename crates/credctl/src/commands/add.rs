//! `credctl add`

use std::process::ExitCode;

use anyhow::{bail, Context as _, Result};
use credctl_core::protocol::{Action, AddPayload, Metadata};
use credctl_providers::Registry;

use super::login::{login, push_tokens};
use super::{block_on, Context};

pub fn run(
    ctx: &Context,
    provider_type: &str,
    name: &str,
    settings: &[(String, String)],
    force: bool,
    run_login: bool,
) -> Result<ExitCode> {
    let metadata = configure(&ctx.registry, provider_type, settings)?;
    let client = ctx.client()?;

    let mut logged_in = None;
    if run_login {
        let provider = block_on(async {
            let mut provider = ctx
                .registry
                .build(provider_type, &metadata)
                .await
                .context("failed to initialize provider")?;
            login(name, provider.as_mut()).await?;
            Ok::<_, anyhow::Error>(provider)
        })??;
        logged_in = Some(provider);
    }

    client.call(
        Action::Add,
        AddPayload {
            name: name.to_string(),
            provider_type: provider_type.to_string(),
            metadata,
            force,
        },
    )?;

    if let Some(mut provider) = logged_in {
        push_tokens(&client, name, provider.as_mut());
    }

    println!("Provider '{}' added successfully", name);
    Ok(ExitCode::SUCCESS)
}

/// Turn `--set` assignments into provider metadata for `provider_type`.
pub(super) fn configure(
    registry: &Registry,
    provider_type: &str,
    settings: &[(String, String)],
) -> Result<Metadata> {
    if !registry.is_registered(provider_type) {
        bail!(
            "unknown provider type '{}'\nAvailable types: {}",
            provider_type,
            registry.list_types().join(", ")
        );
    }
    let schema = registry.schema(provider_type)?;
    Ok(schema.config_from_pairs(settings)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
        raw.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unknown_type_lists_available_types() {
        let err = configure(&Registry::with_builtin(), "vault", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown provider type 'vault'\nAvailable types: command, oauth2, oauth2-proxy"
        );
    }

    #[test]
    fn settings_become_typed_metadata() {
        let metadata = configure(
            &Registry::with_builtin(),
            "oauth2-proxy",
            &pairs(&[("auth_url", "https://proxy.example/start"), ("redirect_port", "9000")]),
        )
        .unwrap();
        assert_eq!(metadata.get("auth_url"), Some(&json!("https://proxy.example/start")));
        assert_eq!(metadata.get("redirect_port"), Some(&json!(9000)));
    }

    #[test]
    fn unknown_setting_is_rejected() {
        let err = configure(
            &Registry::with_builtin(),
            "command",
            &pairs(&[("command", "true"), ("colour", "blue")]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("colour"));
    }
}
