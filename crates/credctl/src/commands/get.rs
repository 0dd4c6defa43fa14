//! `credctl get`
//!
//! Normally asks the daemon. With `--no-daemon` the provider is built from
//! `--set` assignments and run in-process, for CI jobs without a daemon.

use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{anyhow, Context as _, Result};
use credctl_core::protocol::{Action, ErrorType, GetResponsePayload, Metadata, NamePayload};
use credctl_providers::Registry;
use secrecy::ExposeSecret;
use zeroize::Zeroize;

use super::add::configure;
use super::{block_on, Context};
use crate::client::ResponseError;
use crate::format::{render, OutputFormat};

pub fn run(
    ctx: &Context,
    name: &str,
    format: OutputFormat,
    env_var: Option<&str>,
) -> Result<ExitCode> {
    let client = ctx.client()?;
    let response: GetResponsePayload = client
        .call_for(Action::Get, NamePayload::new(name))
        .map_err(|e| explain(name, e))?;

    let fields = response
        .structured_fields
        .as_ref()
        .filter(|_| response.has_structured_fields);
    print_credential(format, response.output.expose_secret(), fields, env_var)
}

/// `credctl get <type> --no-daemon --set k=v ...`
pub fn run_inline(
    ctx: &Context,
    provider_type: &str,
    settings: &[(String, String)],
    format: OutputFormat,
    env_var: Option<&str>,
) -> Result<ExitCode> {
    let metadata = configure(&ctx.registry, provider_type, settings)?;
    let (mut output, fields) = block_on(fetch_inline(&ctx.registry, provider_type, &metadata))??;
    let printed = print_credential(format, &output, fields.as_ref(), env_var);
    output.zeroize();
    printed
}

/// Build the provider locally and fetch one credential, with its
/// structured fields when the provider has them.
async fn fetch_inline(
    registry: &Registry,
    provider_type: &str,
    metadata: &Metadata,
) -> Result<(String, Option<BTreeMap<String, String>>)> {
    let mut provider = registry
        .build(provider_type, metadata)
        .await
        .context("failed to initialize provider")?;
    let mut raw = provider.get().await.context("failed to get credentials")?;

    let fields = provider.as_structured().and_then(|s| match s.credentials(&raw) {
        Ok(fields) => Some(fields),
        Err(e) => {
            tracing::debug!(error = %e, "No structured fields for inline credential");
            None
        }
    });
    let output = String::from_utf8_lossy(&raw).into_owned();
    raw.zeroize();
    Ok((output, fields))
}

fn print_credential(
    format: OutputFormat,
    output: &str,
    fields: Option<&BTreeMap<String, String>>,
    env_var: Option<&str>,
) -> Result<ExitCode> {
    let mut rendered = render(format, output, fields, env_var)?;
    println!("{}", rendered);
    rendered.zeroize();
    Ok(ExitCode::SUCCESS)
}

/// Add a next step to errors the user can act on.
fn explain(name: &str, err: anyhow::Error) -> anyhow::Error {
    let Some(ResponseError {
        error_type,
        message,
    }) = err.downcast_ref::<ResponseError>().cloned()
    else {
        return err;
    };
    match error_type {
        ErrorType::AuthRequired => anyhow!(
            "authentication required for provider '{}'\n\nRun: credctl login {}",
            name,
            name
        ),
        ErrorType::DeviceFlowRequired => anyhow!(
            "{}\n\nRun: credctl login {}",
            message,
            name
        ),
        ErrorType::Generic => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn response_error(error_type: ErrorType, message: &str) -> anyhow::Error {
        ResponseError {
            error_type,
            message: message.to_string(),
        }
        .into()
    }

    fn settings(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn inline_get_runs_command_provider() {
        let registry = Registry::with_builtin();
        let metadata = configure(&registry, "command", &settings(&[("command", "echo hi")])).unwrap();

        let (output, fields) = fetch_inline(&registry, "command", &metadata).await.unwrap();
        assert_eq!(output, "hi");
        assert_eq!(fields.unwrap().get("raw").map(String::as_str), Some("hi"));
    }

    #[tokio::test]
    async fn inline_get_exposes_json_fields() {
        let registry = Registry::with_builtin();
        let metadata = configure(
            &registry,
            "command",
            &settings(&[
                ("command", r#"echo '{"user":"me","token":"t0k"}'"#),
                ("input_format", "json"),
            ]),
        )
        .unwrap();

        let (output, fields) = fetch_inline(&registry, "command", &metadata).await.unwrap();
        let fields = fields.unwrap();
        assert_eq!(fields["token"], "t0k");

        let env = render(OutputFormat::Env, &output, Some(&fields), None).unwrap();
        assert_eq!(env, "export TOKEN='t0k'\nexport USER='me'");
    }

    #[tokio::test]
    async fn inline_get_reports_provider_failure() {
        let registry = Registry::with_builtin();
        let metadata = configure(&registry, "command", &settings(&[("command", "exit 3")])).unwrap();

        let err = fetch_inline(&registry, "command", &metadata).await.unwrap_err();
        assert_eq!(err.to_string(), "failed to get credentials");
    }

    #[test]
    fn auth_required_suggests_login() {
        let err = explain(
            "corp",
            response_error(ErrorType::AuthRequired, "authentication required for provider 'corp'"),
        );
        assert_eq!(
            err.to_string(),
            "authentication required for provider 'corp'\n\nRun: credctl login corp"
        );
    }

    #[test]
    fn generic_errors_pass_through() {
        let err = explain(
            "gh",
            response_error(ErrorType::Generic, "failed to get credential: command failed: boom"),
        );
        assert_eq!(err.to_string(), "failed to get credential: command failed: boom");

        let err = explain("gh", anyhow!("no credctl socket found (is the daemon running?)"));
        assert_eq!(err.to_string(), "no credctl socket found (is the daemon running?)");
    }
}
