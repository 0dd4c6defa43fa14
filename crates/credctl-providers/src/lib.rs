//! Credential providers for credctl.
//!
//! A provider knows how to produce one credential: run a command, drive an
//! OAuth2/OIDC grant, or catch tokens from an OAuth2 proxy. Providers are
//! created by type name through the [`Registry`] and configured from a
//! metadata map checked against their [`Schema`].
//!
//! Optional behavior is exposed through capability traits reached from the
//! [`Provider`] trait object:
//!
//! - [`Login`]: interactive (re-)authentication
//! - [`TokenCacheProvider`]: import and export of cached tokens
//! - [`StructuredCredentials`]: named fields derived from the output
//!
//! # Example
//!
//! ```no_run
//! use credctl_providers::Registry;
//! use serde_json::{json, Value};
//!
//! # async fn example() -> Result<(), credctl_providers::ProviderError> {
//! let registry = Registry::with_builtin();
//! let Value::Object(config) = json!({"command": "pass show github"}) else {
//!     unreachable!()
//! };
//! let mut provider = registry.build("command", &config).await?;
//! let secret = provider.get().await?;
//! # let _ = secret;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod oauth2;
pub mod oauth2_proxy;
pub mod provider;
pub mod registry;
pub mod schema;
pub mod token;

pub use command::CommandProvider;
pub use error::ProviderError;
pub use oauth2::{FlowError, OAuth2Provider};
pub use oauth2_proxy::OAuth2ProxyProvider;
pub use provider::{CachedTokens, Login, Provider, StructuredCredentials, TokenCacheProvider};
pub use registry::Registry;
pub use schema::{FieldDef, FieldType, Schema, SchemaError};
pub use token::TokenCache;
