//! `credctl list`, `describe`, `delete` and `types`.

use std::fmt::Write as _;
use std::process::ExitCode;

use anyhow::Result;
use credctl_core::protocol::{
    Action, DescribeResponsePayload, ListResponsePayload, Metadata, NamePayload, ProviderSummary,
};
use credctl_providers::Registry;
use serde_json::Value;

use super::Context;

pub fn delete(ctx: &Context, name: &str) -> Result<ExitCode> {
    ctx.client()?.call(Action::Delete, NamePayload::new(name))?;
    println!("Provider '{}' deleted", name);
    Ok(ExitCode::SUCCESS)
}

pub fn list(ctx: &Context) -> Result<ExitCode> {
    let listed: ListResponsePayload = ctx.client()?.call_for(Action::List, ())?;
    if listed.providers.is_empty() {
        println!("No providers configured");
    } else {
        print!("{}", provider_table(&listed.providers));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn describe(ctx: &Context, name: &str) -> Result<ExitCode> {
    let described: DescribeResponsePayload = ctx
        .client()?
        .call_for(Action::Describe, NamePayload::new(name))?;
    let metadata = masked(&ctx.registry, &described.provider_type, &described.metadata);
    print!("{}", description(name, &described.provider_type, &metadata));
    Ok(ExitCode::SUCCESS)
}

pub fn types(ctx: &Context) -> Result<ExitCode> {
    print!("{}", type_help(&ctx.registry)?);
    Ok(ExitCode::SUCCESS)
}

fn provider_table(providers: &[ProviderSummary]) -> String {
    let width = providers
        .iter()
        .map(|p| p.name.len())
        .chain(std::iter::once("NAME".len()))
        .max()
        .unwrap_or(0);

    let mut out = format!("{:<width$}  TYPE\n", "NAME");
    for provider in providers {
        let _ = writeln!(out, "{:<width$}  {}", provider.name, provider.provider_type);
    }
    out
}

/// Hidden fields masked. Unknown types are masked wholesale, as their
/// secrets cannot be told apart.
fn masked(registry: &Registry, provider_type: &str, metadata: &Metadata) -> Metadata {
    match registry.schema(provider_type) {
        Ok(schema) => schema.redact(metadata),
        Err(_) => metadata
            .keys()
            .map(|k| (k.clone(), Value::String(credctl_providers::schema::REDACTED.into())))
            .collect(),
    }
}

fn description(name: &str, provider_type: &str, metadata: &Metadata) -> String {
    let mut out = format!("Name: {}\nType: {}\n", name, provider_type);
    if metadata.is_empty() {
        return out;
    }
    out.push_str("Configuration:\n");
    for (key, value) in metadata {
        let _ = writeln!(out, "  {}: {}", key, display_value(value));
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn type_help(registry: &Registry) -> Result<String> {
    let mut out = String::new();
    for type_name in registry.list_types() {
        let schema = registry.schema(&type_name)?;
        let _ = writeln!(out, "{}", type_name);
        for field in schema.fields() {
            let mut line = format!("  {} ({})", field.name, field.field_type);
            if field.required {
                line.push_str(" [required]");
            }
            if let Some(default) = &field.default {
                let _ = write!(line, " [default: {}]", display_value(default));
            }
            if !field.help.is_empty() {
                let _ = write!(line, "  {}", field.help);
            }
            if !field.valid_values.is_empty() {
                let _ = write!(line, " (one of: {})", field.valid_values.join(", "));
            }
            let _ = writeln!(out, "{}", line);
        }
        out.push('\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn table_aligns_names() {
        let providers = vec![
            ProviderSummary {
                name: "github".into(),
                provider_type: "command".into(),
            },
            ProviderSummary {
                name: "corp-sso".into(),
                provider_type: "oauth2".into(),
            },
        ];
        assert_eq!(
            provider_table(&providers),
            "NAME      TYPE\ngithub    command\ncorp-sso  oauth2\n"
        );
    }

    #[test]
    fn describe_masks_client_secret() {
        let metadata: Metadata = json!({
            "client_id": "cli",
            "client_secret": "s3cret",
            "scopes": ["openid", "email"],
        })
        .as_object()
        .unwrap()
        .clone();

        let masked = masked(&Registry::with_builtin(), "oauth2", &metadata);
        let text = description("corp", "oauth2", &masked);
        assert!(!text.contains("s3cret"));
        assert!(text.contains("  client_secret: ********\n"));
        assert!(text.contains("  scopes: openid, email\n"));
        assert!(text.starts_with("Name: corp\nType: oauth2\nConfiguration:\n"));
    }

    #[test]
    fn unknown_type_is_fully_masked() {
        let metadata: Metadata = json!({"token": "abc"}).as_object().unwrap().clone();
        let masked = masked(&Registry::with_builtin(), "vault", &metadata);
        assert_eq!(masked.get("token"), Some(&json!("********")));
    }

    #[test]
    fn type_help_lists_every_type() {
        let help = type_help(&Registry::with_builtin()).unwrap();
        assert!(help.contains("command\n  command (string) [required]"));
        assert!(help.contains("oauth2-proxy\n"));
        assert!(help.contains("token_field (string) [default: token]"));
    }
}
