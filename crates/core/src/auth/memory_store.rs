//! In-memory credential store
//!
//! Credentials live behind a single `RwLock`, so every read returns a whole
//! credential and compare-and-set is atomic with respect to other writers.

use std::collections::HashMap;

use async_trait::async_trait;
use carelink_domain::{Backend, Credential, Result, Session};
use parking_lot::RwLock;
use tracing::debug;

use super::ports::{CredentialStore, SwapOutcome};

#[derive(Debug, Default)]
struct StoreState {
    credentials: HashMap<Backend, Credential>,
    session: Option<Session>,
}

/// Process-local [`CredentialStore`].
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    state: RwLock<StoreState>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session and a primary-sync credential.
    pub fn with_login(session: Session, credential: Credential) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write();
            state.session = Some(session);
            state.credentials.insert(Backend::PrimarySync, credential);
        }
        store
    }

    /// Replace the logged-in user.
    pub fn set_session(&self, session: Option<Session>) {
        self.state.write().session = session;
    }

    /// Synchronous snapshot, for callers outside an async context.
    pub fn snapshot(&self, backend: Backend) -> Option<Credential> {
        self.state.read().credentials.get(&backend).cloned()
    }

    /// Synchronous install, for seeding fixtures.
    pub fn insert(&self, backend: Backend, credential: Credential) {
        self.state.write().credentials.insert(backend, credential);
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get_current_credential(&self, backend: Backend) -> Result<Option<Credential>> {
        Ok(self.snapshot(backend))
    }

    async fn get_logged_in_user(&self) -> Result<Option<Session>> {
        Ok(self.state.read().session.clone())
    }

    async fn set_credential(&self, backend: Backend, credential: Credential) -> Result<()> {
        self.state.write().credentials.insert(backend, credential);
        debug!(%backend, "credential installed");
        Ok(())
    }

    async fn compare_and_set(
        &self,
        backend: Backend,
        expected_access_token: Option<&str>,
        credential: Credential,
    ) -> Result<SwapOutcome> {
        let mut state = self.state.write();
        let current = state.credentials.get(&backend);
        let matches = match (current, expected_access_token) {
            (Some(current), Some(expected)) => current.has_access_token(expected),
            (None, None) => true,
            _ => false,
        };

        if !matches {
            return Ok(SwapOutcome::Superseded(current.cloned()));
        }

        state.credentials.insert(backend, credential);
        Ok(SwapOutcome::Swapped)
    }

    async fn clear(&self, backend: Backend) -> Result<()> {
        self.state.write().credentials.remove(&backend);
        debug!(%backend, "credential cleared");
        Ok(())
    }
}
