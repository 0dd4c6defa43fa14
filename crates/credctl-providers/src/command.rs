//! Shell command provider.
//!
//! Runs `/bin/sh -c <command>` and returns its standard output with trailing
//! line breaks removed. An optional `login_command` is run attached to the
//! terminal by `credctl login`. The `input_format` field tells how to split
//! the output into structured fields (`raw`, `json` or `env`).

use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use credctl_core::Metadata;
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use crate::error::ProviderError;
use crate::provider::{Login, Provider, StructuredCredentials};
use crate::schema::{string_field, FieldDef, FieldType, Schema};

/// Upper bound on a single command run.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

const FORMATS: &[&str] = &["raw", "json", "env"];

/// How command output is split into structured fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InputFormat {
    #[default]
    Raw,
    Json,
    Env,
}

impl InputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputFormat::Raw => "raw",
            InputFormat::Json => "json",
            InputFormat::Env => "env",
        }
    }

    fn parse(value: &str) -> Result<Self, ProviderError> {
        match value {
            "raw" => Ok(InputFormat::Raw),
            "json" => Ok(InputFormat::Json),
            "env" => Ok(InputFormat::Env),
            other => Err(ProviderError::Config(format!(
                "unsupported input format: {}",
                other
            ))),
        }
    }
}

/// Provider backed by a shell command.
#[derive(Debug, Default)]
pub struct CommandProvider {
    command: String,
    login_command: Option<String>,
    input_format: InputFormat,
}

impl CommandProvider {
    pub const TYPE_NAME: &'static str = "command";
}

#[async_trait]
impl Provider for CommandProvider {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            FieldDef::new("command", FieldType::String)
                .required()
                .help("Command to execute to retrieve credentials"),
            FieldDef::new("login_command", FieldType::String)
                .help("Login command to execute for interactive authentication"),
            FieldDef::new("input_format", FieldType::String)
                .default_value("raw")
                .one_of(FORMATS)
                .help("Format of command output: raw (default), json, or env (KEY=VALUE)"),
        ])
    }

    async fn init(&mut self, config: &Metadata) -> Result<(), ProviderError> {
        self.command = string_field(config, "command")
            .ok_or_else(|| ProviderError::Config("command is required".into()))?;
        self.login_command = string_field(config, "login_command");
        self.input_format = match string_field(config, "input_format") {
            Some(format) => InputFormat::parse(&format)?,
            None => InputFormat::Raw,
        };
        Ok(())
    }

    async fn get(&mut self) -> Result<Vec<u8>, ProviderError> {
        debug!("Running credential command");
        let mut output = run_captured(&self.command, COMMAND_TIMEOUT).await?;

        let trimmed = output
            .iter()
            .rposition(|b| *b != b'\n' && *b != b'\r')
            .map_or(0, |i| i + 1);
        output.truncate(trimmed);
        Ok(output)
    }

    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("command".into(), Value::String(self.command.clone()));
        if let Some(login_command) = &self.login_command {
            metadata.insert("login_command".into(), Value::String(login_command.clone()));
        }
        if self.input_format != InputFormat::Raw {
            metadata.insert(
                "input_format".into(),
                Value::String(self.input_format.as_str().to_string()),
            );
        }
        metadata
    }

    fn as_login(&mut self) -> Option<&mut dyn Login> {
        Some(self)
    }

    fn as_structured(&self) -> Option<&dyn StructuredCredentials> {
        Some(self)
    }
}

#[async_trait]
impl Login for CommandProvider {
    async fn login(&mut self) -> Result<(), ProviderError> {
        let login_command = self
            .login_command
            .as_deref()
            .ok_or_else(|| ProviderError::Unsupported("no login command configured".into()))?;

        let status = Command::new("/bin/sh")
            .arg("-c")
            .arg(login_command)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .status()
            .await?;

        if !status.success() {
            return Err(ProviderError::Command(format!(
                "login command failed: {}",
                status
            )));
        }
        Ok(())
    }
}

impl StructuredCredentials for CommandProvider {
    fn credentials(&self, output: &[u8]) -> Result<BTreeMap<String, String>, ProviderError> {
        let text = String::from_utf8_lossy(output);
        let parse_error = |reason: String| ProviderError::Parse {
            format: self.input_format.as_str(),
            reason,
        };

        match self.input_format {
            InputFormat::Raw => Ok(BTreeMap::from([("raw".to_string(), text.into_owned())])),
            InputFormat::Json => parse_json_fields(&text).map_err(parse_error),
            InputFormat::Env => parse_env_fields(&text).map_err(parse_error),
        }
    }
}

/// Run a shell command with stdin closed, capturing stdout.
///
/// The child is killed if the timeout expires or the future is dropped.
async fn run_captured(command: &str, timeout: Duration) -> Result<Vec<u8>, ProviderError> {
    let child = Command::new("/bin/sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| ProviderError::Timeout(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stderr = stderr.trim();
        return Err(ProviderError::Command(if stderr.is_empty() {
            output.status.to_string()
        } else {
            format!("{}: {}", output.status, stderr)
        }));
    }

    Ok(output.stdout)
}

/// Flatten a JSON object into string fields.
fn parse_json_fields(text: &str) -> Result<BTreeMap<String, String>, String> {
    let object: serde_json::Map<String, Value> =
        serde_json::from_str(text).map_err(|e| e.to_string())?;

    Ok(object
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Null => String::new(),
                Value::Bool(b) => b.to_string(),
                Value::Number(n) => n.to_string(),
                nested => nested.to_string(),
            };
            (key, value)
        })
        .collect())
}

/// Parse `KEY=VALUE` lines, skipping blanks and `#` comments.
fn parse_env_fields(text: &str) -> Result<BTreeMap<String, String>, String> {
    let fields: BTreeMap<String, String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            (key.trim().to_string(), value.to_string())
        })
        .collect();

    if fields.is_empty() {
        return Err("no valid KEY=VALUE pairs found".to_string());
    }
    Ok(fields)
}
