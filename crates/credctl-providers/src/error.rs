//! Error type shared by all providers.

use std::time::Duration;

use thiserror::Error;

use crate::oauth2::FlowError;
use crate::schema::SchemaError;

/// Errors returned by providers and the registry.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// No constructor is registered under this type name.
    #[error("unknown provider type: {0}")]
    UnknownProviderType(String),

    /// The configuration does not satisfy the provider's schema.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The configuration is well-formed but unusable.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No usable credential is cached and obtaining one needs the user.
    ///
    /// Clients answer this with a hint to run `credctl login`.
    #[error("authentication required")]
    AuthenticationRequired,

    /// An OAuth2/OIDC flow failed.
    #[error(transparent)]
    Flow(#[from] FlowError),

    /// An external command failed.
    #[error("command failed: {0}")]
    Command(String),

    /// Output could not be parsed in the configured format.
    #[error("failed to parse {format} output: {reason}")]
    Parse { format: &'static str, reason: String },

    /// The provider does not support the requested operation.
    #[error("{0}")]
    Unsupported(String),

    /// The operation did not finish in time.
    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Whether the caller should tell the user to log in.
    pub fn is_auth_required(&self) -> bool {
        matches!(self, ProviderError::AuthenticationRequired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_required_is_distinguished() {
        assert!(ProviderError::AuthenticationRequired.is_auth_required());
        assert!(!ProviderError::Command("exit status 1".into()).is_auth_required());
        assert!(!ProviderError::Flow(FlowError::AccessDenied).is_auth_required());
    }

    #[test]
    fn timeout_message_uses_seconds() {
        let err = ProviderError::Timeout(Duration::from_secs(60));
        assert_eq!(err.to_string(), "timed out after 60s");
    }
}
