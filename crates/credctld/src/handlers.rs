//! Action handlers.
//!
//! Every handler takes the request payload as received and the access level
//! of the socket it arrived on. Write actions on the read-only socket are
//! refused before the payload is looked at.

use std::fmt;
use std::time::Duration;

use credctl_core::protocol::{
    Action, AddPayload, DescribeResponsePayload, ErrorType, GetResponsePayload,
    ListResponsePayload, NamePayload, Request, Response, SetTokensPayload,
};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::state::{State, StateError};
use credctl_providers::ProviderError;

/// Default bound on a single provider `get()`.
pub const GET_TIMEOUT: Duration = Duration::from_secs(60);

/// Capability granted by the socket a client connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Admin,
    ReadOnly,
}

impl Access {
    pub fn as_str(&self) -> &'static str {
        match self {
            Access::Admin => "admin",
            Access::ReadOnly => "readonly",
        }
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dispatch one request.
pub async fn handle(state: &State, request: Request, access: Access, get_timeout: Duration) -> Response {
    let action = match request.action.parse::<Action>() {
        Ok(action) => action,
        Err(e) => return Response::generic_error(e.to_string()),
    };

    if access == Access::ReadOnly && action.is_write() {
        return Response::generic_error(format!(
            "permission denied: {} operation not allowed on read-only socket",
            action
        ));
    }

    match action {
        Action::Add => add(state, &request).await,
        Action::Get => get(state, &request, get_timeout).await,
        Action::Delete => delete(state, &request).await,
        Action::SetTokens => set_tokens(state, &request).await,
        Action::List => list(state).await,
        Action::Describe => describe(state, &request).await,
    }
}

fn payload<T: DeserializeOwned>(request: &Request) -> Result<T, Response> {
    request
        .payload_as()
        .map_err(|e| Response::generic_error(e.to_string()))
}

async fn add(state: &State, request: &Request) -> Response {
    let payload: AddPayload = match payload(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state
        .add(
            &payload.name,
            &payload.provider_type,
            &payload.metadata,
            payload.force,
        )
        .await
    {
        Ok(()) => Response::ok(),
        Err(e @ (StateError::EmptyName | StateError::EmptyType)) => {
            Response::generic_error(e.to_string())
        }
        Err(StateError::Create(e)) => {
            Response::generic_error(format!("failed to create provider: {}", e))
        }
        Err(StateError::Init(e)) => {
            Response::generic_error(format!("failed to initialize provider: {}", e))
        }
        Err(e) => Response::generic_error(format!("failed to add provider: {}", e)),
    }
}

async fn get(state: &State, request: &Request, timeout: Duration) -> Response {
    let NamePayload { name } = match payload(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    let provider = match state.get(&name).await {
        Ok((_, provider)) => provider,
        Err(StateError::NotFound(_)) => {
            return Response::generic_error(format!("provider not found: {}", name))
        }
        Err(e) => return Response::generic_error(format!("failed to load provider: {}", e)),
    };

    let fetched = tokio::time::timeout(timeout, async {
        let mut provider = provider.lock().await;
        let output = provider.get().await?;
        let metadata = provider.metadata();
        let structured = provider
            .as_structured()
            .map(|s| s.credentials(&output))
            .transpose();
        Ok::<_, ProviderError>((output, metadata, structured))
    })
    .await
    .unwrap_or(Err(ProviderError::Timeout(timeout)));

    let (output, metadata, structured) = match fetched {
        Ok(fetched) => fetched,
        Err(e) if e.is_auth_required() => {
            debug!(name = %name, "Provider needs interactive authentication");
            return Response::error(
                ErrorType::AuthRequired,
                format!("authentication required for provider '{}'", name),
            );
        }
        Err(e) => return Response::generic_error(format!("failed to get credential: {}", e)),
    };

    let structured_fields = match structured {
        Ok(fields) => fields,
        Err(e) => {
            warn!(name = %name, error = %e, "Could not derive structured fields");
            None
        }
    };

    debug!(name = %name, bytes = output.len(), "Credential fetched");
    Response::ok_with(GetResponsePayload {
        output: SecretString::from(String::from_utf8_lossy(&output).into_owned()),
        metadata: Some(metadata),
        has_structured_fields: structured_fields.is_some(),
        structured_fields,
    })
}

async fn delete(state: &State, request: &Request) -> Response {
    let NamePayload { name } = match payload(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state.delete(&name).await {
        Ok(()) => Response::ok(),
        Err(e @ StateError::EmptyName) => Response::generic_error(e.to_string()),
        Err(e) => Response::generic_error(format!("failed to delete provider: {}", e)),
    }
}

async fn set_tokens(state: &State, request: &Request) -> Response {
    let payload: SetTokensPayload = match payload(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state
        .set_tokens(
            &payload.name,
            &payload.access_token,
            payload.refresh_token.as_ref(),
            payload.expires_in,
        )
        .await
    {
        Ok(()) => Response::ok(),
        Err(e) => Response::generic_error(format!("failed to set tokens: {}", e)),
    }
}

async fn list(state: &State) -> Response {
    match state.list().await {
        Ok(providers) => Response::ok_with(ListResponsePayload { providers }),
        Err(e) => Response::generic_error(format!("failed to list providers: {}", e)),
    }
}

async fn describe(state: &State, request: &Request) -> Response {
    let NamePayload { name } = match payload(request) {
        Ok(p) => p,
        Err(response) => return response,
    };

    match state.describe(&name).await {
        Ok((provider_type, metadata)) => Response::ok_with(DescribeResponsePayload {
            provider_type,
            metadata,
        }),
        Err(StateError::NotFound(_)) => {
            Response::generic_error(format!("provider not found: {}", name))
        }
        Err(e) => Response::generic_error(format!("failed to describe provider: {}", e)),
    }
}
