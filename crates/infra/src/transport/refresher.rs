//! Token refresh RPC against the primary sync backend
//!
//! The call goes straight through [`HttpClient`]: no decorator chain, no
//! credential headers and no retry.

use std::time::Duration;

use async_trait::async_trait;
use carelink_core::TokenRefresher;
use carelink_domain::constants::DEFAULT_CONTENT_TYPE;
use carelink_domain::{Credential, RefreshFailure, Result, TransportConfig, TransportError};
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::request::OutboundRequest;
use crate::http::HttpClient;

const ENVELOPE_SUCCESS: i64 = 200;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Platform response envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    status_code: Option<i64>,
    error_message: Option<String>,
    data: Option<TokenPayload>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    #[serde(alias = "accessToken")]
    jwt_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// [`TokenRefresher`] backed by `POST {primary}{refresh.path}`.
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    http: HttpClient,
    url: Url,
    timeout: Duration,
}

impl HttpTokenRefresher {
    /// `http` should be the primary sync client so the refresh shares its
    /// connection pool.
    ///
    /// # Errors
    /// Returns `TransportError::Config` if the refresh URL cannot be built.
    pub fn new(http: HttpClient, config: &TransportConfig) -> Result<Self> {
        let base = config.primary.parsed_base_url()?;
        let url = OutboundRequest::post(config.refresh.path.as_str())
            .url(&base)
            .map_err(|e| TransportError::Config(format!("refresh endpoint: {e}")))?;
        Ok(Self { http, url, timeout: config.refresh.timeouts.total() })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(
        &self,
        current: &Credential,
    ) -> std::result::Result<Credential, RefreshFailure> {
        let refresh_token = current
            .refresh_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| RefreshFailure::rejected("no refresh token available"))?;

        let builder = self
            .http
            .request(Method::POST, self.url.clone())
            .timeout(self.timeout)
            .header(CONTENT_TYPE, DEFAULT_CONTENT_TYPE)
            .json(&RefreshRequest { refresh_token });

        let response = self
            .http
            .send(builder)
            .await
            .map_err(|e| RefreshFailure::network(e.to_string()))?;

        let status = response.status();
        let retry_after = response.headers().contains_key(RETRY_AFTER);
        let body = response
            .bytes()
            .await
            .map_err(|e| RefreshFailure::network(format!("reading refresh response: {e}")))?;

        if is_transient_status(status, retry_after) {
            warn!(%status, retry_after, "refresh endpoint unavailable");
            return Err(RefreshFailure::network(format!("refresh endpoint returned {status}")));
        }
        if !status.is_success() {
            warn!(%status, "refresh endpoint rejected the refresh token");
            return Err(RefreshFailure::rejected(format!("refresh endpoint returned {status}")));
        }

        let refreshed = parse_refresh_response(&body, current)?;
        debug!(expires_at = ?refreshed.expires_at, "refresh endpoint issued a new credential");
        Ok(refreshed)
    }
}

/// Statuses that say nothing about the refresh token itself.
fn is_transient_status(status: StatusCode, retry_after: bool) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || (retry_after && !status.is_success())
}

/// Decode either the platform envelope or a bare token payload.
fn parse_refresh_response(
    body: &[u8],
    current: &Credential,
) -> std::result::Result<Credential, RefreshFailure> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| RefreshFailure::malformed(format!("refresh response is not JSON: {e}")))?;

    let is_envelope = value.get("statusCode").is_some() || value.get("data").is_some();
    let payload = if is_envelope {
        let envelope: Envelope = serde_json::from_value(value)
            .map_err(|e| RefreshFailure::malformed(format!("unexpected refresh envelope: {e}")))?;
        if let Some(code) = envelope.status_code.filter(|code| *code != ENVELOPE_SUCCESS) {
            let message = envelope.error_message.unwrap_or_default();
            return Err(RefreshFailure::rejected(format!("refresh refused ({code}): {message}")));
        }
        envelope.data.unwrap_or_default()
    } else {
        serde_json::from_value::<TokenPayload>(value)
            .map_err(|e| RefreshFailure::malformed(format!("unexpected refresh payload: {e}")))?
    };

    let access_token = payload
        .jwt_token
        .filter(|token| !token.is_empty())
        .ok_or_else(|| RefreshFailure::malformed("refresh response carries no token"))?;

    let mut refreshed = Credential::new(access_token);
    refreshed.refresh_token = payload
        .refresh_token
        .filter(|token| !token.is_empty())
        .or_else(|| current.refresh_token.clone());
    refreshed.issued_for = current.issued_for.clone();
    if let Some(seconds) = payload.expires_in {
        refreshed = refreshed.expires_in(seconds);
    }
    Ok(refreshed)
}
