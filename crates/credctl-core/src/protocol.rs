//! Protocol types for client-daemon communication.
//!
//! The credctl protocol uses JSON over Unix sockets with newline-delimited
//! messages. Every connection carries exactly one request and one response:
//!
//! ```text
//! {"action":"get","payload":{"name":"github"}}
//! {"status":"ok","payload":{"output":"gho_...","has_structured_fields":false}}
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Provider configuration as exchanged on the wire and persisted on disk.
pub type Metadata = serde_json::Map<String, Value>;

/// The operations a client can ask the daemon to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Add,
    Get,
    Delete,
    SetTokens,
    List,
    Describe,
}

impl Action {
    /// The wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Get => "get",
            Action::Delete => "delete",
            Action::SetTokens => "set_tokens",
            Action::List => "list",
            Action::Describe => "describe",
        }
    }

    /// Whether the action mutates daemon state.
    ///
    /// Mutating actions are only accepted on the admin socket.
    pub fn is_write(&self) -> bool {
        matches!(self, Action::Add | Action::Delete | Action::SetTokens)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" => Ok(Action::Add),
            "get" => Ok(Action::Get),
            "delete" => Ok(Action::Delete),
            "set_tokens" => Ok(Action::SetTokens),
            "list" => Ok(Action::List),
            "describe" => Ok(Action::Describe),
            other => Err(ProtocolError::UnknownAction(other.to_string())),
        }
    }
}

/// A request from the client to the daemon.
///
/// The action is kept as a raw string so that the daemon can answer
/// unknown actions with a proper error response, and the payload stays
/// untyped until the handler for the action decodes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Request {
    /// Build a request with a typed payload.
    pub fn new(action: Action, payload: impl Serialize) -> Result<Self, ProtocolError> {
        Ok(Self {
            action: action.as_str().to_string(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Build a request that carries no payload (e.g. `list`).
    pub fn bare(action: Action) -> Self {
        Self {
            action: action.as_str().to_string(),
            payload: Value::Null,
        }
    }

    /// Decode the payload into the type expected by the action.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.payload.clone()).map_err(ProtocolError::InvalidPayload)
    }

    /// Parse a request from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(ProtocolError::Serialization)
    }

    /// Serialize the request to a JSON string with newline.
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Outcome of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// Classification of an error response, used by clients to print
/// actionable messages instead of raw error text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// The provider needs an interactive `credctl login` first.
    AuthRequired,

    /// The provider uses the device flow and must be logged in explicitly.
    DeviceFlowRequired,

    /// Anything else.
    Generic,
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorType::AuthRequired => write!(f, "auth_required"),
            ErrorType::DeviceFlowRequired => write!(f, "device_flow_required"),
            ErrorType::Generic => write!(f, "generic"),
        }
    }
}

/// A response from the daemon to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl Response {
    /// Create a successful response without payload.
    pub fn ok() -> Self {
        Self {
            status: Status::Ok,
            error: None,
            error_type: None,
            payload: None,
        }
    }

    /// Create a successful response carrying a payload.
    ///
    /// Payload types in this module always encode; a failure is reported as
    /// a generic error response rather than a panic.
    pub fn ok_with(payload: impl Serialize) -> Self {
        match serde_json::to_value(payload) {
            Ok(value) => Self {
                payload: Some(value),
                ..Self::ok()
            },
            Err(e) => Self::error(
                ErrorType::Generic,
                format!("failed to encode response: {}", e),
            ),
        }
    }

    /// Create an error response.
    pub fn error(error_type: ErrorType, message: impl Into<String>) -> Self {
        Self {
            status: Status::Error,
            error: Some(message.into()),
            error_type: Some(error_type),
            payload: None,
        }
    }

    /// Shorthand for a generic error response.
    pub fn generic_error(message: impl Into<String>) -> Self {
        Self::error(ErrorType::Generic, message)
    }

    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }

    /// The error message, or an empty string for successful responses.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or_default()
    }

    /// Decode the payload into the type expected for the request's action.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let value = self.payload.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(ProtocolError::InvalidPayload)
    }

    /// Parse a response from a JSON string.
    pub fn parse(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(ProtocolError::Serialization)
    }

    /// Serialize the response to a JSON string with newline.
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }
}

/// Payload of an `add` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddPayload {
    pub name: String,

    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default)]
    pub metadata: Metadata,

    /// Overwrite an existing provider with the same name.
    #[serde(default, skip_serializing_if = "is_false")]
    pub force: bool,
}

/// Payload of requests that address a single provider by name
/// (`get`, `delete`, `describe`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamePayload {
    pub name: String,
}

impl NamePayload {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

pub type GetPayload = NamePayload;
pub type DeletePayload = NamePayload;
pub type DescribePayload = NamePayload;

/// Payload of a `set_tokens` request, used to push tokens obtained by a
/// client-side login into the daemon's in-memory provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetTokensPayload {
    pub name: String,

    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub access_token: SecretString,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_optional_secret",
        deserialize_with = "deserialize_optional_secret"
    )]
    pub refresh_token: Option<SecretString>,

    /// Seconds until the access token expires.
    pub expires_in: i64,
}

/// Response payload of a `get` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetResponsePayload {
    /// The credential. Serialized as a plain string for IPC.
    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub output: SecretString,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_fields: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub has_structured_fields: bool,
}

/// Response payload of a `describe` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescribeResponsePayload {
    #[serde(rename = "type")]
    pub provider_type: String,

    #[serde(default)]
    pub metadata: Metadata,
}

/// One entry of a `list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub name: String,

    #[serde(rename = "type")]
    pub provider_type: String,
}

/// Response payload of a `list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListResponsePayload {
    #[serde(default)]
    pub providers: Vec<ProviderSummary>,
}

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize or parse a message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The payload did not match the shape expected for the action.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    /// The action name is not part of the protocol.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// Failed to read/write to the socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection closed before a full message was received.
    #[error("connection closed")]
    ConnectionClosed,
}

fn is_false(value: &bool) -> bool {
    !*value
}

// Secrets cross the socket as plain strings; only the in-process
// representation is wrapped.
fn serialize_secret<S>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use secrecy::ExposeSecret;
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<SecretString, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(SecretString::from(s))
}

fn serialize_optional_secret<S>(
    secret: &Option<SecretString>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use secrecy::ExposeSecret;
    match secret {
        Some(secret) => serializer.serialize_some(secret.expose_secret()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_optional_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = Option::<String>::deserialize(deserializer)?;
    Ok(s.filter(|s| !s.is_empty()).map(SecretString::from))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;
    use serde_json::json;

    #[test]
    fn action_parses_wire_names() {
        assert_eq!("set_tokens".parse::<Action>().unwrap(), Action::SetTokens);
        assert_eq!("describe".parse::<Action>().unwrap(), Action::Describe);

        let err = "explode".parse::<Action>().unwrap_err();
        assert_eq!(err.to_string(), "unknown action: explode");
    }

    #[test]
    fn only_mutating_actions_are_writes() {
        assert!(Action::Add.is_write());
        assert!(Action::Delete.is_write());
        assert!(Action::SetTokens.is_write());
        assert!(!Action::Get.is_write());
        assert!(!Action::List.is_write());
        assert!(!Action::Describe.is_write());
    }

    #[test]
    fn request_without_payload_omits_field() {
        let line = Request::bare(Action::List).to_json_line().unwrap();
        assert_eq!(line, "{\"action\":\"list\"}\n");

        let parsed = Request::parse(line.trim()).unwrap();
        assert!(parsed.payload.is_null());
    }

    #[test]
    fn request_with_typed_payload() {
        let request = Request::new(Action::Get, NamePayload::new("github")).unwrap();
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json, json!({"action": "get", "payload": {"name": "github"}}));

        let payload: GetPayload = request.payload_as().unwrap();
        assert_eq!(payload.name, "github");
    }

    #[test]
    fn add_payload_uses_type_key_and_defaults_force() {
        let json = r#"{"action":"add","payload":{"name":"x","type":"command","metadata":{"command":"echo hi"}}}"#;
        let request = Request::parse(json).unwrap();
        let payload: AddPayload = request.payload_as().unwrap();

        assert_eq!(payload.name, "x");
        assert_eq!(payload.provider_type, "command");
        assert_eq!(payload.metadata["command"], json!("echo hi"));
        assert!(!payload.force);
    }

    #[test]
    fn malformed_payload_is_reported() {
        let request = Request::parse(r#"{"action":"get","payload":{"nom":"x"}}"#).unwrap();
        let err = request.payload_as::<GetPayload>().unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload(_)));
        assert!(err.to_string().starts_with("invalid payload:"));
    }

    #[test]
    fn error_response_wire_shape() {
        let response = Response::error(ErrorType::AuthRequired, "authentication required");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            json!({
                "status": "error",
                "error": "authentication required",
                "error_type": "auth_required"
            })
        );
    }

    #[test]
    fn ok_response_omits_optional_fields() {
        let line = Response::ok().to_json_line().unwrap();
        assert_eq!(line, "{\"status\":\"ok\"}\n");
    }

    #[test]
    fn get_response_exposes_secret_only_on_the_wire() {
        let payload = GetResponsePayload {
            output: SecretString::from("s3cret"),
            metadata: None,
            structured_fields: None,
            has_structured_fields: false,
        };

        assert!(!format!("{:?}", payload).contains("s3cret"));

        let response = Response::ok_with(&payload);
        let line = response.to_json_line().unwrap();
        assert!(line.contains("\"output\":\"s3cret\""));

        let parsed: GetResponsePayload = Response::parse(line.trim())
            .unwrap()
            .payload_as()
            .unwrap();
        assert_eq!(parsed.output.expose_secret(), "s3cret");
    }

    #[test]
    fn set_tokens_payload_optional_refresh_token() {
        let json = json!({"name": "idp", "access_token": "at", "expires_in": 3600});
        let payload: SetTokensPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.access_token.expose_secret(), "at");
        assert!(payload.refresh_token.is_none());

        let json = json!({"name": "idp", "access_token": "at", "refresh_token": "rt", "expires_in": 10});
        let payload: SetTokensPayload = serde_json::from_value(json).unwrap();
        assert_eq!(
            payload.refresh_token.as_ref().map(|s| s.expose_secret().to_string()),
            Some("rt".to_string())
        );
    }

    #[test]
    fn list_payload_parses_providers() {
        let response = Response::parse(
            r#"{"status":"ok","payload":{"providers":[{"name":"a","type":"command"}]}}"#,
        )
        .unwrap();
        let list: ListResponsePayload = response.payload_as().unwrap();
        assert_eq!(
            list.providers,
            vec![ProviderSummary {
                name: "a".to_string(),
                provider_type: "command".to_string()
            }]
        );
    }

    #[test]
    fn invalid_json_returns_error() {
        assert!(Request::parse("not valid json").is_err());
        assert!(Response::parse("{").is_err());
    }
}
