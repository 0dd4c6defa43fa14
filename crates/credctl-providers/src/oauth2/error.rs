use thiserror::Error;

/// Failures of an OAuth2/OIDC flow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status without an OAuth error body.
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The server answered with an OAuth `error` object.
    #[error("OAuth error: {code}{}", describe(.description))]
    OAuth {
        code: String,
        description: Option<String>,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The callback `state` did not match the one we sent.
    #[error("state mismatch in authorization callback (possible CSRF attack)")]
    StateMismatch,

    /// The authorization server redirected back with an `error`.
    #[error("authorization failed: {code}{}", describe(.description))]
    AuthorizationDenied {
        code: String,
        description: Option<String>,
    },

    #[error("authorization callback did not include a code")]
    MissingCode,

    #[error("device code expired before authorization completed")]
    DeviceCodeExpired,

    #[error("access denied by user")]
    AccessDenied,

    #[error("timed out waiting for authorization callback")]
    CallbackTimeout,

    #[error("callback server failed: {0}")]
    Callback(#[source] std::io::Error),

    #[error("failed to open browser: {0}")]
    Browser(String),

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("ID token verification failed: {0}")]
    IdToken(String),

    #[error("failed to read authorization code: {0}")]
    Input(#[source] std::io::Error),
}

impl FlowError {
    /// Failures that indicate tampering rather than a transient problem.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, FlowError::StateMismatch | FlowError::IdToken(_))
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            FlowError::DeviceCodeExpired | FlowError::CallbackTimeout => true,
            FlowError::Http(e) => e.is_timeout(),
            _ => false,
        }
    }
}

fn describe(description: &Option<String>) -> String {
    match description.as_deref() {
        Some(d) if !d.is_empty() => format!(" ({})", d),
        _ => String::new(),
    }
}
