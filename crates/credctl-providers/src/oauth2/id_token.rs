//! OIDC ID token verification against the issuer's JWKS.

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::discovery::discover;
use super::FlowError;

/// Claims we read from a verified ID token.
#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verify signature, issuer, audience and expiry of `id_token`.
pub async fn verify(
    http: &Client,
    issuer: &str,
    client_id: &str,
    id_token: &str,
) -> Result<IdTokenClaims, FlowError> {
    let document = discover(http, issuer).await?;
    let jwks_uri = document
        .jwks_uri
        .ok_or_else(|| FlowError::IdToken("issuer does not publish a jwks_uri".into()))?;

    debug!(jwks_uri = %jwks_uri, "Fetching issuer signing keys");
    let jwks: JwkSet = http
        .get(&jwks_uri)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await
        .map_err(|e| FlowError::IdToken(format!("malformed JWKS: {}", e)))?;

    verify_with_keys(&jwks, issuer, client_id, id_token)
}

/// Verify `id_token` against an already fetched key set.
pub fn verify_with_keys(
    jwks: &JwkSet,
    issuer: &str,
    client_id: &str,
    id_token: &str,
) -> Result<IdTokenClaims, FlowError> {
    let header = decode_header(id_token).map_err(|e| FlowError::IdToken(e.to_string()))?;

    if matches!(
        header.alg,
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
    ) {
        return Err(FlowError::IdToken(format!(
            "unexpected symmetric signing algorithm {:?}",
            header.alg
        )));
    }

    let jwk = match &header.kid {
        Some(kid) => jwks.find(kid),
        None if jwks.keys.len() == 1 => jwks.keys.first(),
        None => None,
    }
    .ok_or_else(|| FlowError::IdToken("no matching signing key in JWKS".into()))?;

    let key = DecodingKey::from_jwk(jwk).map_err(|e| FlowError::IdToken(e.to_string()))?;

    let trimmed = issuer.trim_end_matches('/');
    let mut validation = Validation::new(header.alg);
    validation.set_issuer(&[issuer, trimmed]);
    validation.set_audience(&[client_id]);
    validation.set_required_spec_claims(&["exp", "iss", "aud"]);

    let data = decode::<IdTokenClaims>(id_token, &key, &validation)
        .map_err(|e| FlowError::IdToken(e.to_string()))?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PRIVATE_KEY: &str = include_str!("../../tests/fixtures/id_token_rsa.pem");
    const JWKS: &str = include_str!("../../tests/fixtures/id_token_jwks.json");

    const ISSUER: &str = "https://id.example.com";

    fn jwks() -> JwkSet {
        serde_json::from_str(JWKS).unwrap()
    }

    fn sign(claims: serde_json::Value, kid: Option<&str>) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = kid.map(String::from);
        let key = EncodingKey::from_rsa_pem(PRIVATE_KEY.as_bytes()).unwrap();
        encode(&header, &claims, &key).unwrap()
    }

    fn claims(iss: &str, aud: &str, exp_offset: i64) -> serde_json::Value {
        json!({
            "iss": iss,
            "sub": "user-1",
            "aud": aud,
            "exp": Utc::now().timestamp() + exp_offset,
            "email": "user@example.com",
        })
    }

    #[test]
    fn valid_token_is_accepted() {
        let token = sign(claims(ISSUER, "app", 600), Some("test-key"));
        let claims = verify_with_keys(&jwks(), ISSUER, "app", &token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.email.as_deref(), Some("user@example.com"));
    }

    #[test]
    fn wrong_audience_is_rejected() {
        let token = sign(claims(ISSUER, "someone-else", 600), Some("test-key"));
        let err = verify_with_keys(&jwks(), ISSUER, "app", &token).unwrap_err();
        assert!(err.is_security_violation());
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let token = sign(claims("https://evil.example.com", "app", 600), Some("test-key"));
        assert!(verify_with_keys(&jwks(), ISSUER, "app", &token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = sign(claims(ISSUER, "app", -3600), Some("test-key"));
        assert!(verify_with_keys(&jwks(), ISSUER, "app", &token).is_err());
    }

    #[test]
    fn unknown_kid_is_rejected() {
        let token = sign(claims(ISSUER, "app", 600), Some("rotated-away"));
        let err = verify_with_keys(&jwks(), ISSUER, "app", &token).unwrap_err();
        assert!(err.to_string().contains("no matching signing key"));
    }

    #[test]
    fn symmetric_tokens_are_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(ISSUER, "app", 600),
            &EncodingKey::from_secret(b"client-secret"),
        )
        .unwrap();
        let err = verify_with_keys(&jwks(), ISSUER, "app", &token).unwrap_err();
        assert!(err.to_string().contains("symmetric"));
    }

    #[tokio::test]
    async fn verify_fetches_keys_through_discovery() {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": issuer,
                "jwks_uri": format!("{}/keys", issuer),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/keys"))
            .respond_with(ResponseTemplate::new(200).set_body_string(JWKS))
            .expect(1)
            .mount(&server)
            .await;

        let token = sign(claims(&issuer, "app", 600), Some("test-key"));
        let claims = verify(&Client::new(), &issuer, "app", &token).await.unwrap();
        assert_eq!(claims.iss, issuer);
    }
}
