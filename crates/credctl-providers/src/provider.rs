//! The provider contract and its optional capabilities.
//!
//! Every provider type implements [`Provider`]. Some also support
//! interactive login, token synchronization or structured output; callers
//! discover those through the `as_*` accessors, which return `None` unless
//! a type overrides them.
//!
//! ```ignore
//! if let Some(login) = provider.as_login() {
//!     login.login().await?;
//! }
//! ```

use std::collections::BTreeMap;

use async_trait::async_trait;
use credctl_core::Metadata;
use secrecy::SecretString;

use crate::error::ProviderError;
use crate::schema::Schema;

/// A source of credentials.
///
/// Instances are created empty by the [`Registry`](crate::Registry) and
/// configured once through [`init`](Provider::init). The daemon keeps each
/// instance behind its own mutex, so methods take `&mut self` freely.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Registry name of this provider type (e.g. `"command"`).
    fn type_name(&self) -> &'static str;

    /// Fields this provider type accepts.
    fn schema(&self) -> Schema;

    /// Configure the instance.
    ///
    /// All configuration errors surface here rather than on first `get()`.
    /// May perform network I/O (OIDC discovery).
    async fn init(&mut self, config: &Metadata) -> Result<(), ProviderError>;

    /// Produce the credential.
    async fn get(&mut self) -> Result<Vec<u8>, ProviderError>;

    /// Configuration to persist. Feeding it to `init()` on a fresh instance
    /// reproduces this provider. Never contains token material.
    fn metadata(&self) -> Metadata;

    fn as_login(&mut self) -> Option<&mut dyn Login> {
        None
    }

    fn as_token_cache(&mut self) -> Option<&mut dyn TokenCacheProvider> {
        None
    }

    fn as_structured(&self) -> Option<&dyn StructuredCredentials> {
        None
    }
}

/// Interactive (re-)authentication, run from the CLI where a user is present.
#[async_trait]
pub trait Login: Send {
    async fn login(&mut self) -> Result<(), ProviderError>;
}

/// Tokens handed from a client-side login to the daemon's instance.
#[derive(Debug, Clone)]
pub struct CachedTokens {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

/// Read and replace a provider's cached tokens.
pub trait TokenCacheProvider: Send {
    fn set_tokens(
        &mut self,
        access_token: &str,
        refresh_token: Option<&str>,
        expires_in: i64,
    ) -> Result<(), ProviderError>;

    fn tokens(&self) -> Option<CachedTokens>;
}

/// Named fields derived from a credential, for templated client output.
pub trait StructuredCredentials: Send + Sync {
    /// Split `output`, as just returned by `get()`, into fields.
    fn credentials(&self, output: &[u8]) -> Result<BTreeMap<String, String>, ProviderError>;
}
