//! Transport configuration structures
//!
//! Deserialized from TOML/JSON files or assembled from environment variables
//! by the infrastructure loader.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::constants::{
    DEFAULT_CONTENT_TYPE, DEFAULT_POOL_IDLE_TIMEOUT_SECS, DEFAULT_POOL_MAX_IDLE_PER_HOST,
    DEFAULT_REFRESH_PATH, DEFAULT_USER_AGENT, IDENTITY_TIMEOUT_SECS, PRIMARY_CONNECT_TIMEOUT_SECS,
    PRIMARY_READ_TIMEOUT_SECS, PRIMARY_WRITE_TIMEOUT_SECS, REFRESH_TIMEOUT_SECS,
};
use crate::errors::{Result, TransportError};
use crate::types::Backend;

/// Top-level transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub primary: BackendConfig,
    pub identity_registry: BackendConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    /// `None` selects [`HttpLogLevel::for_build`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_log_level: Option<HttpLogLevel>,
}

impl TransportConfig {
    /// Configuration with default timeouts for the given base URLs.
    pub fn new(primary_base_url: impl Into<String>, identity_base_url: impl Into<String>) -> Self {
        Self {
            primary: BackendConfig::primary_sync(primary_base_url),
            identity_registry: BackendConfig::identity_registry(identity_base_url),
            refresh: RefreshConfig::default(),
            pool: PoolConfig::default(),
            http_log_level: None,
        }
    }

    pub fn backend(&self, backend: Backend) -> &BackendConfig {
        match backend {
            Backend::PrimarySync => &self.primary,
            Backend::IdentityRegistry => &self.identity_registry,
        }
    }

    pub fn http_log_level(&self) -> HttpLogLevel {
        self.http_log_level.unwrap_or_else(HttpLogLevel::for_build)
    }

    /// Reject configurations that cannot produce working clients.
    ///
    /// # Errors
    /// Returns `TransportError::Config` for unparseable base URLs, zero
    /// timeouts or a refresh path without a leading slash.
    pub fn validate(&self) -> Result<()> {
        for backend in Backend::ALL {
            self.backend(backend).validate(backend)?;
        }
        self.refresh.timeouts.validate("refresh")?;
        if !self.refresh.path.starts_with('/') {
            return Err(TransportError::Config(format!(
                "refresh path must start with '/': {}",
                self.refresh.path
            )));
        }
        Ok(())
    }
}

/// Per-backend settings, fixed at client construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeouts: TimeoutProfile,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

impl BackendConfig {
    pub fn primary_sync(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeouts: TimeoutProfile::new(
                PRIMARY_CONNECT_TIMEOUT_SECS,
                PRIMARY_READ_TIMEOUT_SECS,
                PRIMARY_WRITE_TIMEOUT_SECS,
            ),
            content_type: default_content_type(),
        }
    }

    pub fn identity_registry(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeouts: TimeoutProfile::uniform(IDENTITY_TIMEOUT_SECS),
            content_type: default_content_type(),
        }
    }

    /// Parsed base URL.
    ///
    /// # Errors
    /// Returns `TransportError::Config` if the URL is empty or invalid.
    pub fn parsed_base_url(&self) -> Result<Url> {
        if self.base_url.trim().is_empty() {
            return Err(TransportError::Config("base URL is empty".into()));
        }
        Url::parse(&self.base_url).map_err(|e| {
            TransportError::Config(format!("invalid base URL '{}': {}", self.base_url, e))
        })
    }

    fn validate(&self, backend: Backend) -> Result<()> {
        self.parsed_base_url()
            .map_err(|e| TransportError::Config(format!("{backend}: {e}")))?;
        self.timeouts.validate(backend.as_str())
    }
}

/// Settings for the unauthenticated refresh call on the primary backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    pub path: String,
    pub timeouts: TimeoutProfile,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_REFRESH_PATH.to_string(),
            timeouts: TimeoutProfile::uniform(REFRESH_TIMEOUT_SECS),
        }
    }
}

/// Connection/read/write deadlines in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutProfile {
    pub connect_secs: u64,
    pub read_secs: u64,
    pub write_secs: u64,
}

impl TimeoutProfile {
    pub const fn new(connect_secs: u64, read_secs: u64, write_secs: u64) -> Self {
        Self { connect_secs, read_secs, write_secs }
    }

    pub const fn uniform(secs: u64) -> Self {
        Self::new(secs, secs, secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// Deadline for one complete attempt: connect, write the request, read
    /// the response.
    pub fn total(&self) -> Duration {
        Duration::from_secs(
            self.connect_secs.saturating_add(self.write_secs).saturating_add(self.read_secs),
        )
    }

    fn validate(&self, owner: &str) -> Result<()> {
        if self.connect_secs == 0 || self.read_secs == 0 || self.write_secs == 0 {
            return Err(TransportError::Config(format!("{owner}: timeouts must be non-zero")));
        }
        Ok(())
    }
}

/// Shared connection pool settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_idle_per_host: usize,
    pub idle_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            idle_timeout_secs: DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

/// Verbosity of per-attempt request logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpLogLevel {
    None,
    /// Method, URL, status, latency
    Basic,
    /// Basic plus headers, credentials redacted
    Headers,
    /// Headers plus bodies
    Body,
}

impl HttpLogLevel {
    /// `Body` in debug builds, `None` in release builds.
    pub const fn for_build() -> Self {
        if cfg!(debug_assertions) {
            Self::Body
        } else {
            Self::None
        }
    }

    /// Parse a level name (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "off" => Some(Self::None),
            "basic" => Some(Self::Basic),
            "headers" => Some(Self::Headers),
            "body" => Some(Self::Body),
            _ => None,
        }
    }
}

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}
