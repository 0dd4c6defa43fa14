//! Token endpoint requests.
//!
//! All grants are form POSTs answered with JSON. An `error` member in the
//! body is reported as [`FlowError::OAuth`] whatever the HTTP status, since
//! the device flow relies on `authorization_pending` coming back as 400.

use reqwest::header::ACCEPT;
use reqwest::Client;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::debug;

use super::FlowError;
use crate::token::TokenCache;

pub const GRANT_AUTHORIZATION_CODE: &str = "authorization_code";
pub const GRANT_REFRESH_TOKEN: &str = "refresh_token";
pub const GRANT_CLIENT_CREDENTIALS: &str = "client_credentials";
pub const GRANT_DEVICE_CODE: &str = "urn:ietf:params:oauth:grant-type:device_code";

const MAX_ERROR_BODY: usize = 200;

/// Client identification sent with every grant.
#[derive(Debug, Clone, Copy)]
pub struct ClientAuth<'a> {
    pub client_id: &'a str,
    pub client_secret: Option<&'a str>,
}

impl<'a> ClientAuth<'a> {
    fn append_to<'p>(&self, params: &mut Vec<(&'static str, &'p str)>)
    where
        'a: 'p,
    {
        params.push(("client_id", self.client_id));
        if let Some(secret) = self.client_secret.filter(|s| !s.is_empty()) {
            params.push(("client_secret", secret));
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    expires_in: i64,
}

impl TokenResponse {
    fn into_cache(self) -> Result<TokenCache, FlowError> {
        let access_token = self
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FlowError::InvalidResponse("token response missing access_token".into()))?;

        Ok(TokenCache::new(access_token, self.expires_in)
            .with_refresh_token(nonempty_secret(self.refresh_token))
            .with_id_token(nonempty_secret(self.id_token))
            .with_token_type(self.token_type))
    }
}

/// Exchange an authorization code, with the PKCE verifier if one was used.
pub async fn exchange_code(
    http: &Client,
    token_endpoint: &str,
    client: ClientAuth<'_>,
    code: &str,
    redirect_uri: &str,
    code_verifier: Option<&str>,
) -> Result<TokenCache, FlowError> {
    let mut params = vec![
        ("grant_type", GRANT_AUTHORIZATION_CODE),
        ("code", code),
        ("redirect_uri", redirect_uri),
    ];
    client.append_to(&mut params);
    if let Some(verifier) = code_verifier {
        params.push(("code_verifier", verifier));
    }

    request_tokens(http, token_endpoint, &params).await
}

/// Use a refresh token. The old refresh token is kept when the server
/// does not rotate it.
pub async fn refresh(
    http: &Client,
    token_endpoint: &str,
    client: ClientAuth<'_>,
    refresh_token: &str,
) -> Result<TokenCache, FlowError> {
    let mut params = vec![
        ("grant_type", GRANT_REFRESH_TOKEN),
        ("refresh_token", refresh_token),
    ];
    client.append_to(&mut params);

    let mut tokens = request_tokens(http, token_endpoint, &params).await?;
    if tokens.refresh_token.is_none() {
        tokens.refresh_token = Some(SecretString::from(refresh_token.to_string()));
    }
    Ok(tokens)
}

pub async fn client_credentials(
    http: &Client,
    token_endpoint: &str,
    client: ClientAuth<'_>,
    scopes: &[String],
) -> Result<TokenCache, FlowError> {
    let scope = scopes.join(" ");
    let mut params = vec![("grant_type", GRANT_CLIENT_CREDENTIALS)];
    client.append_to(&mut params);
    if !scope.is_empty() {
        params.push(("scope", scope.as_str()));
    }

    request_tokens(http, token_endpoint, &params).await
}

/// One poll of the token endpoint during the device flow.
pub async fn device_code_grant(
    http: &Client,
    token_endpoint: &str,
    client: ClientAuth<'_>,
    device_code: &str,
) -> Result<TokenCache, FlowError> {
    let mut params = vec![
        ("grant_type", GRANT_DEVICE_CODE),
        ("device_code", device_code),
    ];
    client.append_to(&mut params);

    request_tokens(http, token_endpoint, &params).await
}

async fn request_tokens(
    http: &Client,
    token_endpoint: &str,
    params: &[(&str, &str)],
) -> Result<TokenCache, FlowError> {
    post_form::<TokenResponse>(http, token_endpoint, params)
        .await?
        .into_cache()
}

/// POST a form and decode the JSON answer.
pub(crate) async fn post_form<T: DeserializeOwned>(
    http: &Client,
    endpoint: &str,
    params: &[(&str, &str)],
) -> Result<T, FlowError> {
    let grant = params
        .iter()
        .find(|(k, _)| *k == "grant_type")
        .map_or("-", |(_, v)| *v);
    debug!(endpoint = %endpoint, grant = %grant, "POST to OAuth endpoint");

    let response = http
        .post(endpoint)
        .header(ACCEPT, "application/json")
        .form(params)
        .send()
        .await?;
    let status = response.status();
    let body = response.text().await?;

    let value: Option<Value> = serde_json::from_str(&body).ok();
    if let Some(code) = value
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(Value::as_str)
    {
        let description = value
            .as_ref()
            .and_then(|v| v.get("error_description"))
            .and_then(Value::as_str)
            .map(String::from);
        return Err(FlowError::OAuth {
            code: code.to_string(),
            description,
        });
    }

    if !status.is_success() {
        return Err(FlowError::Status {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            body: truncate(&body, MAX_ERROR_BODY),
        });
    }

    let value = value.ok_or_else(|| {
        FlowError::InvalidResponse(format!("{} returned a non-JSON body", endpoint))
    })?;
    serde_json::from_value(value).map_err(|e| FlowError::InvalidResponse(e.to_string()))
}

/// Accept `expires_in` as a number or a numeric string; anything else is 0.
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}

fn nonempty_secret(value: Option<String>) -> Option<SecretString> {
    value.filter(|v| !v.is_empty()).map(SecretString::from)
}

fn truncate(body: &str, max: usize) -> String {
    match body.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLIENT: ClientAuth<'static> = ClientAuth {
        client_id: "cli",
        client_secret: Some("shh"),
    };

    fn endpoint(server: &MockServer) -> String {
        format!("{}/token", server.uri())
    }

    #[tokio::test]
    async fn client_credentials_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(header("accept", "application/json"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_secret=shh"))
            .and(body_string_contains("scope=read+write"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-1",
                "token_type": "bearer",
                "expires_in": "3600",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let scopes = vec!["read".to_string(), "write".to_string()];
        let tokens = client_credentials(&Client::new(), &endpoint(&server), CLIENT, &scopes)
            .await
            .unwrap();

        assert_eq!(tokens.access_token.expose_secret(), "at-1");
        assert_eq!(tokens.token_type, "bearer");
        assert!(tokens.expires_in() > 3500);
        assert!(tokens.is_valid());
    }

    #[tokio::test]
    async fn refresh_keeps_old_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-2",
                "expires_in": 60,
            })))
            .mount(&server)
            .await;

        let tokens = refresh(&Client::new(), &endpoint(&server), CLIENT, "rt-old")
            .await
            .unwrap();
        assert_eq!(tokens.access_token.expose_secret(), "at-2");
        assert_eq!(tokens.refresh_token(), Some("rt-old"));
    }

    #[tokio::test]
    async fn refresh_takes_rotated_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at-3",
                "refresh_token": "rt-new",
            })))
            .mount(&server)
            .await;

        let tokens = refresh(&Client::new(), &endpoint(&server), CLIENT, "rt-old")
            .await
            .unwrap();
        assert_eq!(tokens.refresh_token(), Some("rt-new"));
    }

    #[tokio::test]
    async fn exchange_sends_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=abc"))
            .and(body_string_contains("code_verifier=ver"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "at",
                "id_token": "header.claims.sig",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = exchange_code(
            &Client::new(),
            &endpoint(&server),
            CLIENT,
            "abc",
            "http://localhost:8085/callback",
            Some("ver"),
        )
        .await
        .unwrap();
        assert!(tokens.id_token.is_some());
    }

    #[tokio::test]
    async fn oauth_error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_client",
                "error_description": "unknown client",
            })))
            .mount(&server)
            .await;

        let err = client_credentials(&Client::new(), &endpoint(&server), CLIENT, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FlowError::OAuth { ref code, ref description }
                if code == "invalid_client" && description.as_deref() == Some("unknown client")
        ));
    }

    #[tokio::test]
    async fn plain_http_error_is_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let err = client_credentials(&Client::new(), &endpoint(&server), CLIENT, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn missing_access_token_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token_type": "bearer"})))
            .mount(&server)
            .await;

        let err = client_credentials(&Client::new(), &endpoint(&server), CLIENT, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::InvalidResponse(_)));
    }

    #[test]
    fn truncates_long_bodies() {
        let body = "x".repeat(500);
        let short = truncate(&body, MAX_ERROR_BODY);
        assert_eq!(short.len(), MAX_ERROR_BODY + 3);
        assert_eq!(truncate("short", MAX_ERROR_BODY), "short");
    }
}
