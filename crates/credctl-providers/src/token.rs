//! In-memory OAuth2 token state.

use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};

/// A token is treated as expired this long before its actual expiry, so a
/// credential handed out is still good by the time it is used.
pub const EXPIRY_BUFFER_SECS: i64 = 30;

/// Lifetime assumed for tokens issued without an `expires_in`.
pub const NO_EXPIRY_LIFETIME: i64 = 365 * 24 * 60 * 60;

/// Tokens held by an OAuth2 provider. Never persisted.
#[derive(Debug, Clone)]
pub struct TokenCache {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    pub id_token: Option<SecretString>,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenCache {
    /// A bearer token expiring `expires_in` seconds from now.
    pub fn new(access_token: impl Into<String>, expires_in: i64) -> Self {
        Self {
            access_token: SecretString::from(access_token.into()),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".to_string(),
            expires_at: expiry_from_now(expires_in),
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: Option<SecretString>) -> Self {
        self.refresh_token = refresh_token;
        self
    }

    pub fn with_id_token(mut self, id_token: Option<SecretString>) -> Self {
        self.id_token = id_token;
        self
    }

    pub fn with_token_type(mut self, token_type: Option<String>) -> Self {
        if let Some(token_type) = token_type.filter(|t| !t.is_empty()) {
            self.token_type = token_type;
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Valid iff the access token is non-empty and `now + 30s` is before expiry.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.expose_secret().is_empty()
            && now + Duration::seconds(EXPIRY_BUFFER_SECS) < self.expires_at
    }

    /// Whole seconds until expiry, never negative.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token
            .as_ref()
            .map(|t| t.expose_secret())
            .filter(|t| !t.is_empty())
    }
}

/// Servers that omit `expires_in` (or send 0) issue long-lived tokens.
/// Lifetimes are capped at [`NO_EXPIRY_LIFETIME`].
pub fn normalize_expires_in(expires_in: i64) -> i64 {
    if expires_in <= 0 {
        NO_EXPIRY_LIFETIME
    } else {
        expires_in.min(NO_EXPIRY_LIFETIME)
    }
}

/// `now + expires_in`, normalized as by [`normalize_expires_in`].
pub fn expiry_from_now(expires_in: i64) -> DateTime<Utc> {
    let now = Utc::now();
    Duration::try_seconds(normalize_expires_in(expires_in))
        .and_then(|lifetime| now.checked_add_signed(lifetime))
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expiring_at(expires_at: DateTime<Utc>) -> TokenCache {
        TokenCache {
            expires_at,
            ..TokenCache::new("tok", 3600)
        }
    }

    #[test]
    fn validity_respects_buffer() {
        let now = Utc::now();

        assert!(expiring_at(now + Duration::seconds(31)).is_valid_at(now));
        assert!(!expiring_at(now + Duration::seconds(30)).is_valid_at(now));
        assert!(!expiring_at(now + Duration::seconds(10)).is_valid_at(now));
        assert!(!expiring_at(now - Duration::seconds(1)).is_valid_at(now));
    }

    #[test]
    fn empty_access_token_is_invalid() {
        let token = TokenCache::new("", 3600);
        assert!(!token.is_valid());
    }

    #[test]
    fn missing_lifetime_means_long_lived() {
        assert_eq!(normalize_expires_in(0), NO_EXPIRY_LIFETIME);
        assert_eq!(normalize_expires_in(-5), NO_EXPIRY_LIFETIME);
        assert_eq!(normalize_expires_in(120), 120);

        let token = TokenCache::new("tok", 0);
        assert!(token.expires_in() > 364 * 24 * 60 * 60);
    }

    #[test]
    fn huge_lifetime_is_capped() {
        assert_eq!(normalize_expires_in(i64::MAX), NO_EXPIRY_LIFETIME);

        let token = TokenCache::new("tok", i64::MAX);
        assert!(token.is_valid());
        assert!(token.expires_in() <= NO_EXPIRY_LIFETIME);
        assert!(token.expires_in() > NO_EXPIRY_LIFETIME - 60);
    }

    #[test]
    fn debug_does_not_leak_secrets() {
        let token = TokenCache::new("very-secret-token", 60)
            .with_refresh_token(Some(SecretString::from("refresh-me".to_string())));
        let debug = format!("{:?}", token);
        assert!(!debug.contains("very-secret-token"));
        assert!(!debug.contains("refresh-me"));
    }

    #[test]
    fn empty_refresh_token_counts_as_absent() {
        let token = TokenCache::new("tok", 60)
            .with_refresh_token(Some(SecretString::from(String::new())));
        assert_eq!(token.refresh_token(), None);
    }
}
