//! Authorization code grant, with optional PKCE.
//!
//! With a loopback redirect URI (`localhost` or `127.0.0.1`) the code is
//! caught by a [`CallbackListener`]. Any other redirect URI points at a page
//! we cannot observe, so the user pastes the code from the address bar.

use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use url::Url;

use super::browser::{open_or_print, UrlOpener};
use super::callback::{CallbackListener, CALLBACK_TIMEOUT};
use super::pkce::{generate_state, Pkce, CHALLENGE_METHOD};
use super::token::{self, ClientAuth};
use super::FlowError;
use crate::token::TokenCache;

pub const DEFAULT_CALLBACK_PATH: &str = "/callback";

/// Where the authorization server sends the browser back to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Redirect {
    Loopback { uri: String, port: u16, path: String },
    External(String),
}

/// Work out the redirect URI and whether we can listen on it.
///
/// Without a configured URI, `http://localhost:<default_port>/callback` is
/// used. A loopback URI contributes its port and path, falling back to
/// `default_port` and `/callback`.
pub(crate) fn resolve_redirect(
    configured: Option<&str>,
    default_port: u16,
) -> Result<Redirect, FlowError> {
    let Some(uri) = configured.filter(|u| !u.is_empty()) else {
        return Ok(Redirect::Loopback {
            uri: format!("http://localhost:{}{}", default_port, DEFAULT_CALLBACK_PATH),
            port: default_port,
            path: DEFAULT_CALLBACK_PATH.to_string(),
        });
    };

    let parsed = Url::parse(uri)
        .map_err(|e| FlowError::InvalidUrl(format!("redirect_uri {}: {}", uri, e)))?;

    match parsed.host_str() {
        Some("localhost") | Some("127.0.0.1") => {
            let path = match parsed.path() {
                "" | "/" => DEFAULT_CALLBACK_PATH.to_string(),
                path => path.to_string(),
            };
            Ok(Redirect::Loopback {
                uri: uri.to_string(),
                port: parsed.port().unwrap_or(default_port),
                path,
            })
        }
        _ => Ok(Redirect::External(uri.to_string())),
    }
}

pub fn build_authorization_url(
    auth_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
    pkce: Option<&Pkce>,
) -> Result<String, FlowError> {
    let mut url = Url::parse(auth_endpoint)
        .map_err(|e| FlowError::InvalidUrl(format!("auth_endpoint {}: {}", auth_endpoint, e)))?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("client_id", client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", redirect_uri);
        if !scopes.is_empty() {
            query.append_pair("scope", &scopes.join(" "));
        }
        query.append_pair("state", state);
        if let Some(pkce) = pkce {
            query
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", CHALLENGE_METHOD);
        }
    }

    Ok(url.into())
}

pub struct AuthCodeFlow<'a> {
    pub http: &'a Client,
    pub client: ClientAuth<'a>,
    pub auth_endpoint: &'a str,
    pub token_endpoint: &'a str,
    pub scopes: &'a [String],
    pub redirect_uri: Option<&'a str>,
    pub redirect_port: u16,
    pub use_pkce: bool,
    pub opener: &'a dyn UrlOpener,
}

impl AuthCodeFlow<'_> {
    /// Send the user to the authorization endpoint and exchange the code
    /// that comes back.
    pub async fn run(&self) -> Result<TokenCache, FlowError> {
        let state = generate_state();
        let pkce = self.use_pkce.then(Pkce::generate);

        let (code, redirect_uri) = match resolve_redirect(self.redirect_uri, self.redirect_port)? {
            Redirect::Loopback { uri, port, path } => {
                let listener = CallbackListener::bind(port, &path).await?;
                let uri = if port == 0 {
                    with_port(&uri, listener.port())?
                } else {
                    uri
                };

                self.open_authorization_page(&uri, &state, pkce.as_ref())?;
                let code = listener.wait_for_code(&state, CALLBACK_TIMEOUT).await?;
                (code, uri)
            }
            Redirect::External(uri) => {
                self.open_authorization_page(&uri, &state, pkce.as_ref())?;
                (prompt_for_code(&uri).await?, uri)
            }
        };

        info!("Authorization code received, exchanging for tokens");
        token::exchange_code(
            self.http,
            self.token_endpoint,
            self.client,
            &code,
            &redirect_uri,
            pkce.as_ref().map(|p| p.verifier.as_str()),
        )
        .await
    }

    fn open_authorization_page(
        &self,
        redirect_uri: &str,
        state: &str,
        pkce: Option<&Pkce>,
    ) -> Result<(), FlowError> {
        let url = build_authorization_url(
            self.auth_endpoint,
            self.client.client_id,
            redirect_uri,
            self.scopes,
            state,
            pkce,
        )?;
        open_or_print(self.opener, &url);
        Ok(())
    }
}

fn with_port(uri: &str, port: u16) -> Result<String, FlowError> {
    let mut url = Url::parse(uri).map_err(|e| FlowError::InvalidUrl(e.to_string()))?;
    url.set_port(Some(port))
        .map_err(|_| FlowError::InvalidUrl(format!("cannot set port on {}", uri)))?;
    Ok(url.into())
}

async fn prompt_for_code(redirect_uri: &str) -> Result<String, FlowError> {
    eprintln!();
    eprintln!("External redirect URI detected: {}", redirect_uri);
    eprintln!("After authorizing, extract the 'code' parameter from the callback URL and enter it below.");
    eprint!("Enter authorization code: ");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .map_err(FlowError::Input)?;

    let code = line.trim();
    if code.is_empty() {
        return Err(FlowError::MissingCode);
    }
    Ok(code.to_string())
}
