//! Port interfaces for credential storage and token refresh

use async_trait::async_trait;
use carelink_domain::{Backend, Credential, RefreshFailure, Result, Session};

/// Outcome of [`CredentialStore::compare_and_set`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    /// The expected credential was current and has been replaced.
    Swapped,
    /// Another writer got there first; carries whatever is current now.
    Superseded(Option<Credential>),
}

/// Persisted store holding the current credential per backend and the
/// logged-in user.
///
/// Implementations must allow concurrent reads and serialize writes so a
/// reader observes either the prior or the new credential, never a mix.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Current credential for the backend, if any.
    async fn get_current_credential(&self, backend: Backend) -> Result<Option<Credential>>;

    /// Logged-in user, if any.
    async fn get_logged_in_user(&self) -> Result<Option<Session>>;

    /// Unconditionally install a credential (login).
    async fn set_credential(&self, backend: Backend, credential: Credential) -> Result<()>;

    /// Install `credential` only if the current access token equals
    /// `expected_access_token` (`None` meaning no credential is stored).
    async fn compare_and_set(
        &self,
        backend: Backend,
        expected_access_token: Option<&str>,
        credential: Credential,
    ) -> Result<SwapOutcome>;

    /// Remove the backend's credential (logout).
    async fn clear(&self, backend: Backend) -> Result<()>;
}

/// Performs the refresh RPC against the primary backend.
///
/// Implementations issue exactly one call and never retry; the retry policy
/// belongs to the exchange. The caller persists the returned credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange the refresh material in `current` for a new credential.
    async fn refresh(
        &self,
        current: &Credential,
    ) -> std::result::Result<Credential, RefreshFailure>;
}
