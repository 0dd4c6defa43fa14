//! OpenID Connect discovery.

use reqwest::header::ACCEPT;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::FlowError;

/// The subset of the provider configuration document we use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DiscoveryDocument {
    #[serde(default)]
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    #[serde(default)]
    pub jwks_uri: Option<String>,
}

pub fn discovery_url(issuer: &str) -> String {
    format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    )
}

/// Fetch the issuer's configuration document.
pub async fn discover(http: &Client, issuer: &str) -> Result<DiscoveryDocument, FlowError> {
    let url = discovery_url(issuer);
    debug!(url = %url, "Fetching OIDC discovery document");

    let response = http
        .get(&url)
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(|e| FlowError::Discovery(format!("{}: {}", url, e)))?;

    if response.status() != StatusCode::OK {
        return Err(FlowError::Discovery(format!(
            "{} returned HTTP {}",
            url,
            response.status().as_u16()
        )));
    }

    response
        .json::<DiscoveryDocument>()
        .await
        .map_err(|e| FlowError::Discovery(format!("malformed discovery document: {}", e)))
}
