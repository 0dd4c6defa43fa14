//! Provider for OAuth2 transparent proxies.
//!
//! The proxy runs the real OAuth flow itself and finally redirects to our
//! local `/callback` with the tokens in the query string. `auth_url` is the
//! full proxy URL, already carrying the callback address the proxy expects.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credctl_core::Metadata;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::info;

use crate::error::ProviderError;
use crate::oauth2::{
    open_or_print, CallbackListener, FlowError, SystemBrowser, UrlOpener, CALLBACK_TIMEOUT,
    DEFAULT_REDIRECT_PORT,
};
use crate::provider::{CachedTokens, Login, Provider, StructuredCredentials, TokenCacheProvider};
use crate::schema::{int_field, string_field, FieldDef, FieldType, Schema};
use crate::token::{expiry_from_now, normalize_expires_in};

/// Proxies do not report a lifetime; tokens are reused for this long.
pub const PROXY_TOKEN_LIFETIME_SECS: i64 = 60 * 60;

const CALLBACK_PATH: &str = "/callback";
const TOKEN_FIELDS: &[&str] = &["token", "access_token", "both"];

/// Which callback parameter `get()` returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenField {
    #[default]
    Token,
    AccessToken,
    /// Both, as a JSON object.
    Both,
}

impl TokenField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenField::Token => "token",
            TokenField::AccessToken => "access_token",
            TokenField::Both => "both",
        }
    }

    fn parse(value: &str) -> Result<Self, ProviderError> {
        match value {
            "token" => Ok(TokenField::Token),
            "access_token" => Ok(TokenField::AccessToken),
            "both" => Ok(TokenField::Both),
            other => Err(ProviderError::Config(format!(
                "invalid token_field '{}': must be one of: {}",
                other,
                TOKEN_FIELDS.join(", ")
            ))),
        }
    }
}

#[derive(Debug, Clone)]
struct ProxyTokens {
    token: Option<SecretString>,
    access_token: Option<SecretString>,
    expires_at: DateTime<Utc>,
}

impl ProxyTokens {
    fn new(token: Option<String>, access_token: Option<String>, lifetime_secs: i64) -> Self {
        let secret = |v: Option<String>| v.filter(|s| !s.is_empty()).map(SecretString::from);
        Self {
            token: secret(token),
            access_token: secret(access_token),
            expires_at: expiry_from_now(lifetime_secs),
        }
    }

    fn token(&self) -> Option<&str> {
        self.token.as_ref().map(|t| t.expose_secret())
    }

    fn access_token(&self) -> Option<&str> {
        self.access_token.as_ref().map(|t| t.expose_secret())
    }

    /// Unexpired and holding what `field` asks for.
    fn is_valid_for(&self, field: TokenField) -> bool {
        let present = match field {
            TokenField::Token => self.token.is_some(),
            TokenField::AccessToken => self.access_token.is_some(),
            TokenField::Both => self.token.is_some() || self.access_token.is_some(),
        };
        present && Utc::now() < self.expires_at
    }
}

/// The `oauth2-proxy` provider type.
pub struct OAuth2ProxyProvider {
    auth_url: String,
    token_field: TokenField,
    redirect_port: u16,
    tokens: Option<ProxyTokens>,
    opener: Arc<dyn UrlOpener>,
}

impl Default for OAuth2ProxyProvider {
    fn default() -> Self {
        Self::with_opener(Arc::new(SystemBrowser))
    }
}

impl fmt::Debug for OAuth2ProxyProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2ProxyProvider")
            .field("auth_url", &self.auth_url)
            .field("token_field", &self.token_field)
            .field("redirect_port", &self.redirect_port)
            .field("has_tokens", &self.tokens.is_some())
            .finish()
    }
}

impl OAuth2ProxyProvider {
    pub const TYPE_NAME: &'static str = "oauth2-proxy";

    pub fn with_opener(opener: Arc<dyn UrlOpener>) -> Self {
        Self {
            auth_url: String::new(),
            token_field: TokenField::Token,
            redirect_port: DEFAULT_REDIRECT_PORT,
            tokens: None,
            opener,
        }
    }

    /// Send the browser to the proxy and wait for it to come back with tokens.
    async fn authenticate(&mut self) -> Result<(), ProviderError> {
        let listener = CallbackListener::bind(self.redirect_port, CALLBACK_PATH).await?;
        open_or_print(self.opener.as_ref(), &self.auth_url);

        let tokens = listener
            .wait_with(CALLBACK_TIMEOUT, |params| {
                let token = params.get("token").filter(|t| !t.is_empty()).cloned();
                let access_token = params.get("access_token").filter(|t| !t.is_empty()).cloned();
                if token.is_none() && access_token.is_none() {
                    return Err(FlowError::InvalidResponse(
                        "no tokens received in callback (expected 'token' or 'access_token' parameters)"
                            .into(),
                    ));
                }
                Ok(ProxyTokens::new(token, access_token, PROXY_TOKEN_LIFETIME_SECS))
            })
            .await?;

        info!("Proxy authentication complete");
        self.tokens = Some(tokens);
        Ok(())
    }

    fn format_output(&self) -> Result<Vec<u8>, ProviderError> {
        let tokens = self
            .tokens
            .as_ref()
            .ok_or(ProviderError::AuthenticationRequired)?;

        match self.token_field {
            TokenField::Token => tokens
                .token()
                .map(|t| t.as_bytes().to_vec())
                .ok_or_else(|| ProviderError::Command("token not available".into())),
            TokenField::AccessToken => tokens
                .access_token()
                .map(|t| t.as_bytes().to_vec())
                .ok_or_else(|| ProviderError::Command("access_token not available".into())),
            TokenField::Both => {
                let both = serde_json::json!({
                    "token": tokens.token().unwrap_or_default(),
                    "access_token": tokens.access_token().unwrap_or_default(),
                });
                Ok(both.to_string().into_bytes())
            }
        }
    }
}

#[async_trait]
impl Provider for OAuth2ProxyProvider {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            FieldDef::new("auth_url", FieldType::String)
                .required()
                .help("Full URL of the proxy authentication endpoint (including callback_url parameter)"),
            FieldDef::new("token_field", FieldType::String)
                .default_value("token")
                .one_of(TOKEN_FIELDS)
                .help("Token to return: token, access_token, or both (as JSON)"),
            FieldDef::new("redirect_port", FieldType::Int)
                .default_value(DEFAULT_REDIRECT_PORT)
                .help("Local port for OAuth callback server"),
        ])
    }

    async fn init(&mut self, config: &Metadata) -> Result<(), ProviderError> {
        self.auth_url = string_field(config, "auth_url")
            .ok_or_else(|| ProviderError::Config("auth_url is required".into()))?;
        self.token_field = match string_field(config, "token_field") {
            Some(field) => TokenField::parse(&field)?,
            None => TokenField::Token,
        };
        self.redirect_port = match int_field(config, "redirect_port")? {
            None => DEFAULT_REDIRECT_PORT,
            Some(port) => u16::try_from(port).map_err(|_| {
                ProviderError::Config(format!("redirect_port {} is out of range", port))
            })?,
        };
        self.tokens = None;
        Ok(())
    }

    async fn get(&mut self) -> Result<Vec<u8>, ProviderError> {
        let cached = self
            .tokens
            .as_ref()
            .is_some_and(|t| t.is_valid_for(self.token_field));
        if !cached {
            self.authenticate().await?;
        }
        self.format_output()
    }

    fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("auth_url".into(), Value::String(self.auth_url.clone()));
        metadata.insert(
            "token_field".into(),
            Value::String(self.token_field.as_str().to_string()),
        );
        metadata.insert("redirect_port".into(), Value::from(self.redirect_port));
        metadata
    }

    fn as_login(&mut self) -> Option<&mut dyn Login> {
        Some(self)
    }

    fn as_token_cache(&mut self) -> Option<&mut dyn TokenCacheProvider> {
        Some(self)
    }

    fn as_structured(&self) -> Option<&dyn StructuredCredentials> {
        Some(self)
    }
}

#[async_trait]
impl Login for OAuth2ProxyProvider {
    async fn login(&mut self) -> Result<(), ProviderError> {
        self.tokens = None;
        self.authenticate().await
    }
}

/// The proxy's `token` travels in the refresh token slot, since the
/// token-cache exchange only knows access and refresh tokens.
impl TokenCacheProvider for OAuth2ProxyProvider {
    fn set_tokens(
        &mut self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
    ) -> Result<(), ProviderError> {
        let tokens = ProxyTokens::new(
            refresh_token.map(String::from),
            Some(access_token.to_string()),
            normalize_expires_in(expires_in),
        );
        if tokens.token.is_none() && tokens.access_token.is_none() {
            return Err(ProviderError::Config("no tokens to set".into()));
        }
        self.tokens = Some(tokens);
        Ok(())
    }

    fn tokens(&self) -> Option<CachedTokens> {
        let tokens = self.tokens.as_ref()?;
        Some(CachedTokens {
            access_token: tokens
                .access_token
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new())),
            refresh_token: tokens.token.clone(),
            expires_in: (tokens.expires_at - Utc::now()).num_seconds().max(0),
        })
    }
}

impl StructuredCredentials for OAuth2ProxyProvider {
    fn credentials(&self, _output: &[u8]) -> Result<BTreeMap<String, String>, ProviderError> {
        let mut fields = BTreeMap::new();
        if let Some(tokens) = &self.tokens {
            if let Some(token) = tokens.token() {
                fields.insert("token".to_string(), token.to_string());
            }
            if let Some(access_token) = tokens.access_token() {
                fields.insert("access_token".to_string(), access_token.to_string());
            }
        }
        Ok(fields)
    }
}
