//! Credential and session types
//!
//! A [`Credential`] is the token material proving identity to one backend.
//! A [`Session`] describes the logged-in user and is read-only from the
//! transport's point of view.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the logged-in user as the primary backend knows it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for UserId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Token material for one backend.
///
/// `access_token` is the live JWT sent with every decorated request.
/// `refresh_token` is the material presented to the refresh endpoint; the
/// identity registry never carries one.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// User the credential was issued for, when the backend reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_for: Option<UserId>,

    /// Server-determined validity. `None` means the server did not say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            issued_for: None,
            expires_at: None,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn issued_for(mut self, user: UserId) -> Self {
        self.issued_for = Some(user);
        self
    }

    #[must_use]
    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Set `expires_at` from a lifetime in seconds. Non-positive lifetimes
    /// leave the validity unknown.
    #[must_use]
    pub fn expires_in(mut self, seconds: i64) -> Self {
        if seconds > 0 {
            self.expires_at = Some(Utc::now() + chrono::Duration::seconds(seconds));
        }
        self
    }

    /// Whether the credential is expired or expires within the threshold.
    /// Credentials without a known expiry are never considered expired;
    /// the backend's 401 is the authority for those.
    #[must_use]
    pub fn is_expired(&self, threshold_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + chrono::Duration::seconds(threshold_seconds) >= expires_at
            }
            None => false,
        }
    }

    /// True when this credential carries the given access token.
    pub fn has_access_token(&self, token: &str) -> bool {
        self.access_token == token
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("issued_for", &self.issued_for)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Logged-in user as recorded by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    /// Backend-scoped identity claims (e.g. facility or role ids).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub claims: BTreeMap<String, String>,
}

impl Session {
    #[must_use]
    pub fn new(user_id: UserId) -> Self {
        Self { user_id, user_name: None, claims: BTreeMap::new() }
    }

    #[must_use]
    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.claims.insert(key.into(), value.into());
        self
    }
}
