//! Error types used throughout the transport layer

use std::fmt;

use thiserror::Error;

use crate::types::Backend;

/// What went wrong at the network level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkFailureKind {
    /// A connect/read/write deadline expired
    Timeout,
    /// DNS failure, refused or reset connection
    Connect,
    Other,
}

impl fmt::Display for NetworkFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Connect => "connect",
            Self::Other => "other",
        })
    }
}

/// Classification of a failed refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailureReason {
    /// Refresh RPC could not complete (transport error, deadline, 5xx)
    Network,
    /// Backend refused the refresh material
    Rejected,
    /// Refresh response could not be decoded into a credential
    Malformed,
    /// Credential store failed while the refresh was being coordinated
    Storage,
}

impl fmt::Display for RefreshFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Network => "network",
            Self::Rejected => "rejected",
            Self::Malformed => "malformed",
            Self::Storage => "storage",
        })
    }
}

/// Definitive failure of a token refresh. Cloned to every exchange that
/// was waiting on the same refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token refresh failed ({reason}): {message}")]
pub struct RefreshFailure {
    pub reason: RefreshFailureReason,
    pub message: String,
}

impl RefreshFailure {
    pub fn new(reason: RefreshFailureReason, message: impl Into<String>) -> Self {
        Self { reason, message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(RefreshFailureReason::Network, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(RefreshFailureReason::Rejected, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(RefreshFailureReason::Malformed, message)
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(RefreshFailureReason::Storage, message)
    }

    /// A transient failure may succeed if attempted again later. Rejected
    /// or malformed outcomes will not change until the credential does.
    pub fn is_transient(&self) -> bool {
        matches!(self.reason, RefreshFailureReason::Network | RefreshFailureReason::Storage)
    }
}

/// Categories of transport errors for caller retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Network/connection errors - retryable with backoff
    Network,
    /// Credential rejected or expired - re-authenticate
    Authentication,
    /// Unexpected status or undecodable payload - not retryable
    Protocol,
    /// Credential store failure
    Storage,
    /// Configuration or request-construction errors - not retryable
    Config,
    Internal,
}

impl ErrorCategory {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Storage)
    }
}

/// Typed failure of a transport operation.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Network error ({kind}): {message}")]
    Network { kind: NetworkFailureKind, message: String },

    #[error("{backend} rejected the credential (status {status})")]
    Unauthorized { backend: Backend, status: u16 },

    #[error("Authentication expired: {0}")]
    AuthenticationExpired(RefreshFailure),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{backend} returned status {status}")]
    Status { backend: Backend, status: u16, body: String },

    #[error("Credential store error: {0}")]
    CredentialStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransportError {
    pub fn network(kind: NetworkFailureKind, message: impl Into<String>) -> Self {
        Self::Network { kind, message: message.into() }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } => ErrorCategory::Network,
            Self::Unauthorized { .. } | Self::AuthenticationExpired(_) => {
                ErrorCategory::Authentication
            }
            Self::Protocol(_) | Self::Status { .. } => ErrorCategory::Protocol,
            Self::CredentialStore(_) => ErrorCategory::Storage,
            Self::Config(_) | Self::InvalidRequest(_) => ErrorCategory::Config,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the caller may retry with backoff
    pub fn is_retryable(&self) -> bool {
        self.category().is_retryable()
    }

    /// Whether the caller must present a re-authentication flow
    pub fn requires_reauthentication(&self) -> bool {
        matches!(self, Self::AuthenticationExpired(_) | Self::Unauthorized { .. })
    }

    /// Stable label suitable for metrics/logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network",
            Self::Unauthorized { .. } => "unauthorized",
            Self::AuthenticationExpired(_) => "authentication_expired",
            Self::Protocol(_) => "protocol",
            Self::Status { .. } => "status",
            Self::CredentialStore(_) => "credential_store",
            Self::Config(_) => "config",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<RefreshFailure> for TransportError {
    fn from(failure: RefreshFailure) -> Self {
        Self::AuthenticationExpired(failure)
    }
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;
