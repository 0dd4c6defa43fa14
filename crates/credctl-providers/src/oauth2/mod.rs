//! OAuth2 / OpenID Connect provider and flow engine.
//!
//! One provider type covers three grants, chosen by the `flow` field:
//!
//! - `client-credentials`: non-interactive, run by `get()` whenever needed.
//! - `auth-code`: browser redirect (PKCE by default), run by `get()` when
//!   no valid or refreshable token is cached.
//! - `device`: user enters a code on another device. Only run by an
//!   explicit `login()`; `get()` answers `AuthenticationRequired` instead.
//!
//! With an `issuer`, missing endpoints are filled from OIDC discovery and
//! ID tokens are verified against the issuer's keys.

mod authcode;
mod browser;
mod callback;
mod device;
pub mod discovery;
mod error;
pub mod id_token;
pub mod pkce;
pub mod token;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use credctl_core::Metadata;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, info, warn};

pub use authcode::{build_authorization_url, AuthCodeFlow};
pub use browser::{open_or_print, SystemBrowser, UrlOpener};
pub use callback::{CallbackListener, CallbackParams, CALLBACK_TIMEOUT};
pub use device::{DeviceAuthorization, DeviceFlow};
pub use error::FlowError;

use self::token::ClientAuth;
use crate::error::ProviderError;
use crate::provider::{CachedTokens, Login, Provider, StructuredCredentials, TokenCacheProvider};
use crate::schema::{
    bool_field, int_field, string_field, string_list_field, FieldDef, FieldType, Schema,
};
use crate::token::{normalize_expires_in, TokenCache};

pub const DEFAULT_REDIRECT_PORT: u16 = 8085;

/// Timeout of every HTTP request made by the OAuth2 providers.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

const FLOWS: &[&str] = &["device", "auth-code", "client-credentials"];

/// HTTP client shared by the flows of one provider.
pub(crate) fn http_client() -> Result<Client, FlowError> {
    Ok(Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

/// OAuth2 grant used by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Flow {
    #[default]
    Device,
    AuthCode,
    ClientCredentials,
}

impl Flow {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flow::Device => "device",
            Flow::AuthCode => "auth-code",
            Flow::ClientCredentials => "client-credentials",
        }
    }
}

impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Flow {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "device" => Ok(Flow::Device),
            "auth-code" => Ok(Flow::AuthCode),
            "client-credentials" => Ok(Flow::ClientCredentials),
            other => Err(ProviderError::Config(format!(
                "invalid flow '{}': must be one of: {}",
                other,
                FLOWS.join(", ")
            ))),
        }
    }
}

/// Persisted configuration of an OAuth2 provider.
#[derive(Debug, Clone, Default)]
struct Settings {
    issuer: Option<String>,
    client_id: String,
    client_secret: Option<SecretString>,
    scopes: Vec<String>,
    token_endpoint: Option<String>,
    auth_endpoint: Option<String>,
    device_endpoint: Option<String>,
    redirect_uri: Option<String>,
    redirect_port: u16,
    use_pkce: bool,
    flow: Flow,
    template: Option<String>,
}

impl Settings {
    fn from_config(config: &Metadata) -> Result<Self, ProviderError> {
        let flow = string_field(config, "flow")
            .ok_or_else(|| ProviderError::Config("flow is required".into()))?
            .parse()?;

        let redirect_port = match int_field(config, "redirect_port")? {
            None => DEFAULT_REDIRECT_PORT,
            Some(port) => u16::try_from(port).map_err(|_| {
                ProviderError::Config(format!("redirect_port {} is out of range", port))
            })?,
        };

        Ok(Self {
            issuer: string_field(config, "issuer"),
            client_id: string_field(config, "client_id")
                .ok_or_else(|| ProviderError::Config("client_id is required".into()))?,
            client_secret: string_field(config, "client_secret").map(SecretString::from),
            scopes: string_list_field(config, "scopes"),
            token_endpoint: string_field(config, "token_endpoint"),
            auth_endpoint: string_field(config, "auth_endpoint"),
            device_endpoint: string_field(config, "device_endpoint"),
            redirect_uri: string_field(config, "redirect_uri"),
            redirect_port,
            use_pkce: bool_field(config, "use_pkce")?.unwrap_or(true),
            flow,
            template: string_field(config, "template"),
        })
    }

    /// Whether discovery could fill an endpoint this flow needs.
    fn needs_discovery(&self) -> bool {
        self.issuer.is_some()
            && (self.token_endpoint.is_none()
                || match self.flow {
                    Flow::Device => self.device_endpoint.is_none(),
                    Flow::AuthCode => self.auth_endpoint.is_none(),
                    Flow::ClientCredentials => false,
                })
    }

    /// Fill endpoints that are unset and relevant to the flow.
    fn apply_discovery(&mut self, document: discovery::DiscoveryDocument) {
        if self.token_endpoint.is_none() {
            self.token_endpoint = document.token_endpoint;
        }
        match self.flow {
            Flow::Device if self.device_endpoint.is_none() => {
                self.device_endpoint = document.device_authorization_endpoint;
            }
            Flow::AuthCode if self.auth_endpoint.is_none() => {
                self.auth_endpoint = document.authorization_endpoint;
            }
            _ => {}
        }
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.token_endpoint.is_none() {
            return Err(ProviderError::Config(
                "token_endpoint is required (or provide issuer for auto-discovery)".into(),
            ));
        }

        match self.flow {
            Flow::Device if self.device_endpoint.is_none() => Err(ProviderError::Config(
                "device_endpoint is required for device flow (or provide issuer for auto-discovery)"
                    .into(),
            )),
            Flow::AuthCode if self.auth_endpoint.is_none() => Err(ProviderError::Config(
                "auth_endpoint is required for auth-code flow (or provide issuer for auto-discovery)"
                    .into(),
            )),
            Flow::ClientCredentials if self.client_secret.is_none() => Err(
                ProviderError::Config("client_secret is required for client-credentials flow".into()),
            ),
            _ => Ok(()),
        }
    }

    fn client(&self) -> ClientAuth<'_> {
        ClientAuth {
            client_id: &self.client_id,
            client_secret: self.client_secret.as_ref().map(|s| s.expose_secret()),
        }
    }

    fn to_metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        let mut put = |key: &str, value: Value| {
            metadata.insert(key.to_string(), value);
        };

        put("client_id", Value::String(self.client_id.clone()));
        if let Some(issuer) = &self.issuer {
            put("issuer", Value::String(issuer.clone()));
        }
        if let Some(secret) = &self.client_secret {
            put("client_secret", Value::String(secret.expose_secret().to_string()));
        }
        if !self.scopes.is_empty() {
            put("scopes", Value::from(self.scopes.clone()));
        }
        for (key, value) in [
            ("token_endpoint", &self.token_endpoint),
            ("auth_endpoint", &self.auth_endpoint),
            ("device_endpoint", &self.device_endpoint),
            ("redirect_uri", &self.redirect_uri),
            ("template", &self.template),
        ] {
            if let Some(value) = value {
                put(key, Value::String(value.clone()));
            }
        }
        put("redirect_port", Value::from(self.redirect_port));
        put("use_pkce", Value::Bool(self.use_pkce));
        put("flow", Value::String(self.flow.as_str().to_string()));
        metadata
    }
}

/// The `oauth2` provider type.
pub struct OAuth2Provider {
    settings: Settings,
    tokens: Option<TokenCache>,
    http: Option<Client>,
    opener: Arc<dyn UrlOpener>,
}

impl Default for OAuth2Provider {
    fn default() -> Self {
        Self::with_opener(Arc::new(SystemBrowser))
    }
}

impl fmt::Debug for OAuth2Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuth2Provider")
            .field("flow", &self.settings.flow)
            .field("client_id", &self.settings.client_id)
            .field("has_tokens", &self.tokens.is_some())
            .finish()
    }
}

impl OAuth2Provider {
    pub const TYPE_NAME: &'static str = "oauth2";

    /// A provider that sends the user to authorization pages through `opener`.
    pub fn with_opener(opener: Arc<dyn UrlOpener>) -> Self {
        Self {
            settings: Settings::default(),
            tokens: None,
            http: None,
            opener,
        }
    }

    pub fn flow(&self) -> Flow {
        self.settings.flow
    }

    fn http(&self) -> Result<&Client, ProviderError> {
        self.http
            .as_ref()
            .ok_or_else(|| ProviderError::Config("provider is not initialized".into()))
    }

    fn token_endpoint(&self) -> Result<&str, ProviderError> {
        self.settings
            .token_endpoint
            .as_deref()
            .ok_or_else(|| ProviderError::Config("token_endpoint is not configured".into()))
    }

    fn valid_access_token(&self) -> Option<Vec<u8>> {
        self.tokens
            .as_ref()
            .filter(|t| t.is_valid())
            .map(|t| t.access_token.expose_secret().as_bytes().to_vec())
    }

    /// Try the refresh grant. Failures are logged and swallowed so that the
    /// caller can fall back to a full flow.
    async fn try_refresh(&self) -> Option<TokenCache> {
        let refresh_token = self.tokens.as_ref()?.refresh_token()?.to_string();
        let http = self.http().ok()?;
        let endpoint = self.token_endpoint().ok()?;

        match token::refresh(http, endpoint, self.settings.client(), &refresh_token).await {
            Ok(tokens) => {
                debug!("Refreshed access token");
                Some(tokens)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                None
            }
        }
    }

    async fn run_client_credentials(&self) -> Result<TokenCache, ProviderError> {
        Ok(token::client_credentials(
            self.http()?,
            self.token_endpoint()?,
            self.settings.client(),
            &self.settings.scopes,
        )
        .await?)
    }

    async fn run_auth_code(&self) -> Result<TokenCache, ProviderError> {
        let auth_endpoint = self
            .settings
            .auth_endpoint
            .as_deref()
            .ok_or_else(|| ProviderError::Config("auth_endpoint is not configured".into()))?;

        let flow = AuthCodeFlow {
            http: self.http()?,
            client: self.settings.client(),
            auth_endpoint,
            token_endpoint: self.token_endpoint()?,
            scopes: &self.settings.scopes,
            redirect_uri: self.settings.redirect_uri.as_deref(),
            redirect_port: self.settings.redirect_port,
            use_pkce: self.settings.use_pkce,
            opener: self.opener.as_ref(),
        };
        let tokens = flow.run().await?;
        self.verify_id_token(&tokens).await?;
        Ok(tokens)
    }

    async fn run_device(&self) -> Result<TokenCache, ProviderError> {
        let device_endpoint = self
            .settings
            .device_endpoint
            .as_deref()
            .ok_or_else(|| ProviderError::Config("device_endpoint is not configured".into()))?;

        let flow = DeviceFlow {
            http: self.http()?,
            client: self.settings.client(),
            device_endpoint,
            token_endpoint: self.token_endpoint()?,
            scopes: &self.settings.scopes,
        };
        let tokens = flow.run().await?;
        self.verify_id_token(&tokens).await?;
        Ok(tokens)
    }

    /// With an issuer configured, an ID token in the response must verify.
    async fn verify_id_token(&self, tokens: &TokenCache) -> Result<(), ProviderError> {
        let (Some(issuer), Some(id_token)) = (&self.settings.issuer, &tokens.id_token) else {
            return Ok(());
        };

        let claims = id_token::verify(
            self.http()?,
            issuer,
            &self.settings.client_id,
            id_token.expose_secret(),
        )
        .await?;
        debug!(sub = %claims.sub, "ID token verified");
        Ok(())
    }
}

#[async_trait]
impl Provider for OAuth2Provider {
    fn type_name(&self) -> &'static str {
        Self::TYPE_NAME
    }

    fn schema(&self) -> Schema {
        Schema::new(vec![
            FieldDef::new("issuer", FieldType::String)
                .help("OIDC issuer URL; endpoints are discovered from it"),
            FieldDef::new("client_id", FieldType::String)
                .required()
                .help("OAuth2 client ID"),
            FieldDef::new("client_secret", FieldType::String)
                .hidden()
                .help("OAuth2 client secret (required for client-credentials)"),
            FieldDef::new("scopes", FieldType::StringList)
                .help("Scopes to request (default with issuer: openid)"),
            FieldDef::new("token_endpoint", FieldType::String).help("Token endpoint URL"),
            FieldDef::new("auth_endpoint", FieldType::String)
                .help("Authorization endpoint URL (auth-code flow)"),
            FieldDef::new("device_endpoint", FieldType::String)
                .help("Device authorization endpoint URL (device flow)"),
            FieldDef::new("redirect_port", FieldType::Int)
                .default_value(DEFAULT_REDIRECT_PORT)
                .help("Local port for the OAuth callback server"),
            FieldDef::new("redirect_uri", FieldType::String)
                .help("Redirect URI (default: http://localhost:<redirect_port>/callback)"),
            FieldDef::new("use_pkce", FieldType::Bool)
                .default_value(true)
                .help("Use PKCE with the auth-code flow"),
            FieldDef::new("flow", FieldType::String)
                .required()
                .one_of(FLOWS)
                .help("OAuth2 flow: device, auth-code, or client-credentials"),
            FieldDef::new("template", FieldType::String)
                .help("Output template for clients; stored and returned unchanged, never read by the provider"),
        ])
    }

    async fn init(&mut self, config: &Metadata) -> Result<(), ProviderError> {
        let mut settings = Settings::from_config(config)?;
        let http = http_client()?;

        if settings.needs_discovery() {
            if let Some(issuer) = settings.issuer.clone() {
                let document = discovery::discover(&http, &issuer).await?;
                settings.apply_discovery(document);
            }
        }
        if settings.issuer.is_some() && settings.scopes.is_empty() {
            settings.scopes = vec!["openid".to_string()];
        }
        settings.validate()?;

        self.settings = settings;
        self.http = Some(http);
        self.tokens = None;
        Ok(())
    }

    async fn get(&mut self) -> Result<Vec<u8>, ProviderError> {
        if let Some(token) = self.valid_access_token() {
            return Ok(token);
        }

        if let Some(tokens) = self.try_refresh().await {
            self.tokens = Some(tokens);
            if let Some(token) = self.valid_access_token() {
                return Ok(token);
            }
        }

        let tokens = match self.settings.flow {
            Flow::ClientCredentials => self.run_client_credentials().await?,
            Flow::AuthCode => self.run_auth_code().await?,
            Flow::Device => return Err(ProviderError::AuthenticationRequired),
        };
        self.tokens = Some(tokens);

        self.valid_access_token()
            .ok_or_else(|| ProviderError::Config("issued token is already expired".into()))
    }

    fn metadata(&self) -> Metadata {
        self.settings.to_metadata()
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
impl Login for OAuth2Provider {
    async fn login(&mut self) -> Result<(), ProviderError> {
        let tokens = match self.settings.flow {
            Flow::Device => self.run_device().await?,
            Flow::AuthCode => self.run_auth_code().await?,
            Flow::ClientCredentials => {
                return Err(ProviderError::Unsupported(
                    "client-credentials flow does not support interactive login".into(),
                ))
            }
        };
        info!(flow = %self.settings.flow, "Login complete");
        self.tokens = Some(tokens);
        Ok(())
    }
}

impl TokenCacheProvider for OAuth2Provider {
    fn set_tokens(
        &mut self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
    ) -> Result<(), ProviderError> {
        if access_token.is_empty() {
            return Err(ProviderError::Config("access_token must not be empty".into()));
        }
        self.tokens = Some(
            TokenCache::new(access_token, normalize_expires_in(expires_in)).with_refresh_token(
                refresh_token
                    .filter(|t| !t.is_empty())
                    .map(|t| SecretString::from(t.to_string())),
            ),
        );
        Ok(())
    }

    fn tokens(&self) -> Option<CachedTokens> {
        self.tokens.as_ref().map(|t| CachedTokens {
            access_token: t.access_token.clone(),
            refresh_token: t.refresh_token.clone(),
            expires_in: t.expires_in(),
        })
    }
}

impl StructuredCredentials for OAuth2Provider {
    fn credentials(&self, output: &[u8]) -> Result<BTreeMap<String, String>, ProviderError> {
        let mut fields = BTreeMap::new();
        let Some(tokens) = &self.tokens else {
            fields.insert(
                "access_token".to_string(),
                String::from_utf8_lossy(output).into_owned(),
            );
            return Ok(fields);
        };

        fields.insert(
            "access_token".to_string(),
            tokens.access_token.expose_secret().to_string(),
        );
        if let Some(refresh) = tokens.refresh_token() {
            fields.insert("refresh_token".to_string(), refresh.to_string());
        }
        if let Some(id_token) = &tokens.id_token {
            fields.insert("id_token".to_string(), id_token.expose_secret().to_string());
        }
        fields.insert("token_type".to_string(), tokens.token_type.clone());
        fields.insert("expires_at".to_string(), tokens.expires_at.to_rfc3339());
        fields.insert("expires_in".to_string(), tokens.expires_in().to_string());
        Ok(fields)
    }
}
