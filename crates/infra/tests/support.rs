#![allow(clippy::expect_used)]

use std::sync::Arc;

use carelink_core::testing::RecordingAnalyticsSink;
use carelink_core::InMemoryCredentialStore;
use carelink_domain::{Backend, Credential, HttpLogLevel, Session, TransportConfig, UserId};
use carelink_infra::TransportStack;
use wiremock::MockServer;

pub const REFRESH_PATH: &str = carelink_domain::constants::DEFAULT_REFRESH_PATH;
pub const USER_ID: i64 = 42;

/// Stack whose backends both point at mock servers, with a logged-in user.
pub struct Harness {
    pub primary: MockServer,
    pub identity: MockServer,
    pub store: Arc<InMemoryCredentialStore>,
    pub sink: Arc<RecordingAnalyticsSink>,
    pub stack: TransportStack,
}

impl Harness {
    /// Primary sync holds `T1` (refresh token `R1`); identity registry holds `A1`.
    pub async fn start() -> Self {
        let primary = MockServer::start().await;
        let identity = MockServer::start().await;
        let config = TransportConfig::new(primary.uri(), identity.uri());
        Self::with_config(primary, identity, config)
    }

    pub fn with_config(primary: MockServer, identity: MockServer, config: TransportConfig) -> Self {
        let store = Arc::new(InMemoryCredentialStore::with_login(
            Session::new(UserId::from(USER_ID)),
            Credential::new("T1").with_refresh_token("R1"),
        ));
        store.insert(Backend::IdentityRegistry, Credential::new("A1"));

        let sink = Arc::new(RecordingAnalyticsSink::new());
        let stack = TransportStack::builder(config)
            .credential_store(store.clone())
            .analytics_sink(sink.clone())
            .http_log_level(HttpLogLevel::Body)
            .build()
            .expect("stack should build");

        Self { primary, identity, store, sink, stack }
    }

    pub fn primary_token(&self) -> Option<String> {
        self.store.snapshot(Backend::PrimarySync).map(|c| c.access_token)
    }
}

/// Number of requests `server` received carrying `name: value`.
pub async fn count_with_header(server: &MockServer, name: &str, value: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| {
            request.headers.get(name).and_then(|v| v.to_str().ok()) == Some(value)
        })
        .count()
}

/// Number of requests `server` received on `path`.
pub async fn count_on_path(server: &MockServer, path: &str) -> usize {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path() == path)
        .count()
}
