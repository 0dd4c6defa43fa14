//! Rendering of fetched credentials.

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use clap::ValueEnum;
use serde_json::Value;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// The credential exactly as the provider produced it
    #[default]
    Raw,
    /// A JSON object of the provider's fields
    Json,
    /// Shell `export` statements
    Env,
}

/// Render a credential.
///
/// `fields` are the provider's structured fields, if it has any. `env_var`
/// names the variable for `env` output of a single opaque value.
pub fn render(
    format: OutputFormat,
    output: &str,
    fields: Option<&BTreeMap<String, String>>,
    env_var: Option<&str>,
) -> Result<String> {
    match format {
        OutputFormat::Raw => Ok(output.to_string()),
        OutputFormat::Json => render_json(output, fields),
        OutputFormat::Env => render_env(output, fields, env_var),
    }
}

fn render_json(output: &str, fields: Option<&BTreeMap<String, String>>) -> Result<String> {
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(output) {
        return Ok(serde_json::to_string_pretty(&value)?);
    }
    let object = match fields {
        Some(fields) if !fields.is_empty() => serde_json::to_value(fields)?,
        _ => serde_json::json!({ "output": output }),
    };
    Ok(serde_json::to_string_pretty(&object)?)
}

fn render_env(
    output: &str,
    fields: Option<&BTreeMap<String, String>>,
    env_var: Option<&str>,
) -> Result<String> {
    if let Some(name) = env_var {
        if !is_env_name(name) {
            bail!("invalid env var name: {}", name);
        }
        return Ok(format!("export {}={}", name, shell_quote(output)));
    }

    let fields = match fields {
        Some(fields) if !fields.is_empty() && !is_only_raw(fields) => fields,
        _ => bail!("output appears to be a raw token, please specify --env-var"),
    };

    let lines: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("export {}={}", env_name(key), shell_quote(value)))
        .collect();
    Ok(lines.join("\n"))
}

fn is_only_raw(fields: &BTreeMap<String, String>) -> bool {
    fields.len() == 1 && fields.contains_key("raw")
}

fn is_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// `access_token` -> `ACCESS_TOKEN`; anything outside `[A-Z0-9_]` becomes `_`.
fn env_name(key: &str) -> String {
    let mut name: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    if name.starts_with(|c: char| c.is_ascii_digit()) || name.is_empty() {
        name.insert(0, '_');
    }
    name
}

/// Single-quote for POSIX shells.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}
