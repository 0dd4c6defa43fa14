//! Device authorization grant (RFC 8628).
//!
//! Only ever started by an explicit login: the user has to type a code in
//! a browser, so running it inside the daemon would block a `get` for
//! minutes with nobody watching.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};

use super::token::{self, lenient_i64, post_form, ClientAuth};
use super::FlowError;
use crate::token::TokenCache;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);
pub const SLOW_DOWN_STEP: Duration = Duration::from_secs(5);

/// Used when the server does not say how long the device code lives.
pub const DEFAULT_CODE_LIFETIME: Duration = Duration::from_secs(900);

/// Upper bounds on server-supplied timing, so deadline arithmetic stays finite.
pub const MAX_INTERVAL: Duration = Duration::from_secs(300);
pub const MAX_CODE_LIFETIME: Duration = Duration::from_secs(24 * 60 * 60);

/// Answer of the device authorization endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthorization {
    pub device_code: String,
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub expires_in: i64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub interval: i64,
}

impl DeviceAuthorization {
    fn poll_interval(&self) -> Duration {
        match u64::try_from(self.interval) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs).min(MAX_INTERVAL),
            _ => DEFAULT_INTERVAL,
        }
    }

    fn lifetime(&self) -> Duration {
        match u64::try_from(self.expires_in) {
            Ok(secs) if secs > 0 => Duration::from_secs(secs).min(MAX_CODE_LIFETIME),
            _ => DEFAULT_CODE_LIFETIME,
        }
    }
}

/// A non-terminal poll answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStatus {
    Pending,
    SlowDown,
}

pub struct DeviceFlow<'a> {
    pub http: &'a Client,
    pub client: ClientAuth<'a>,
    pub device_endpoint: &'a str,
    pub token_endpoint: &'a str,
    pub scopes: &'a [String],
}

impl DeviceFlow<'_> {
    /// Request a device code, show it to the user and wait for approval.
    pub async fn run(&self) -> Result<TokenCache, FlowError> {
        let authorization = self.request_authorization().await?;
        print_instructions(&authorization);
        self.poll(&authorization).await
    }

    pub async fn request_authorization(&self) -> Result<DeviceAuthorization, FlowError> {
        let scope = self.scopes.join(" ");
        let mut params = vec![("client_id", self.client.client_id)];
        if !scope.is_empty() {
            params.push(("scope", scope.as_str()));
        }

        post_form(self.http, self.device_endpoint, &params).await
    }

    /// Poll the token endpoint until the user approves, denies, or the
    /// device code expires.
    pub async fn poll(&self, authorization: &DeviceAuthorization) -> Result<TokenCache, FlowError> {
        let deadline = Instant::now() + authorization.lifetime();
        let mut interval = authorization.poll_interval();

        loop {
            if Instant::now() >= deadline {
                return Err(FlowError::DeviceCodeExpired);
            }

            match token::device_code_grant(
                self.http,
                self.token_endpoint,
                self.client,
                &authorization.device_code,
            )
            .await
            {
                Ok(tokens) => {
                    info!("Device authorization complete");
                    return Ok(tokens);
                }
                Err(FlowError::OAuth { code, description }) => {
                    let status = classify_poll_error(code, description)?;
                    interval = next_interval(interval, status);
                    debug!(status = ?status, interval_secs = interval.as_secs(), "Device authorization not complete");
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep_until((Instant::now() + interval).min(deadline)).await;
        }
    }
}

/// Sort a token endpoint error into "keep polling" or a terminal failure.
pub(crate) fn classify_poll_error(
    code: String,
    description: Option<String>,
) -> Result<PollStatus, FlowError> {
    match code.as_str() {
        "authorization_pending" => Ok(PollStatus::Pending),
        "slow_down" => Ok(PollStatus::SlowDown),
        "expired_token" => Err(FlowError::DeviceCodeExpired),
        "access_denied" => Err(FlowError::AccessDenied),
        _ => Err(FlowError::OAuth { code, description }),
    }
}

pub(crate) fn next_interval(current: Duration, status: PollStatus) -> Duration {
    match status {
        PollStatus::Pending => current,
        PollStatus::SlowDown => current + SLOW_DOWN_STEP,
    }
}

fn print_instructions(authorization: &DeviceAuthorization) {
    eprintln!();
    eprintln!("To authenticate, visit:");
    eprintln!("  {}", authorization.verification_uri);
    eprintln!();
    eprintln!("And enter the code: {}", authorization.user_code);
    if let Some(complete) = &authorization.verification_uri_complete {
        eprintln!();
        eprintln!("Or open: {}", complete);
    }
    eprintln!();
    eprintln!("Waiting for authentication...");
}
