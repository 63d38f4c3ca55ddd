//! Request analytics events
//!
//! One [`AnalyticsEvent`] is produced per completed exchange. Events are
//! write-only and fire-and-forget.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Backend;

/// Coarse classification of how an exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeClass {
    /// 1xx-3xx response
    Success,
    /// 4xx response other than 401
    ClientError,
    /// 5xx response
    ServerError,
    /// Final response was 401
    Unauthorized,
    /// Refresh failed; the caller must re-authenticate
    AuthenticationExpired,
    /// Connect/read/write failure or deadline expiry
    NetworkFailure,
    /// Anything else that stopped the exchange before a response
    Failed,
}

impl OutcomeClass {
    /// Classify a final HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Success,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ClientError => "client_error",
            Self::ServerError => "server_error",
            Self::Unauthorized => "unauthorized",
            Self::AuthenticationExpired => "authentication_expired",
            Self::NetworkFailure => "network_failure",
            Self::Failed => "failed",
        }
    }
}

/// Metadata about one exchange. Never contains bodies or credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub timestamp: DateTime<Utc>,
    pub backend: Backend,
    pub method: String,
    /// Request path without query string
    pub path: String,
    pub outcome: OutcomeClass,
    pub status: Option<u16>,
    #[serde(with = "duration_millis")]
    pub latency: Duration,
    pub correlation_id: Uuid,
    /// Number of HTTP attempts (1, or 2 after a refresh)
    pub attempts: u8,
    pub refreshed: bool,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
