//! Remote backends reachable through the transport layer

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the two independent remote services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Primary data-sync backend. Credentials are refreshed on 401.
    PrimarySync,
    /// Identity-registry backend. Long-lived credentials, no refresh path.
    IdentityRegistry,
}

impl Backend {
    /// Every backend, in a stable order.
    pub const ALL: [Backend; 2] = [Backend::PrimarySync, Backend::IdentityRegistry];

    /// Stable label for logs, metrics and persisted keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimarySync => "primary_sync",
            Self::IdentityRegistry => "identity_registry",
        }
    }

    /// Whether an authorization failure on this backend may trigger the
    /// refresh-and-retry path.
    pub fn supports_refresh(self) -> bool {
        matches!(self, Self::PrimarySync)
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
