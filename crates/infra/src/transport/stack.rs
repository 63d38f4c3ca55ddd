//! Wiring of both backend clients
//!
//! A [`TransportStack`] is built once per process. It owns one
//! [`TransportClient`] per backend, the shared credential store, the refresh
//! coordinator of the primary sync backend and the transport metrics.

use std::sync::Arc;

use carelink_core::{
    AnalyticsSink, CredentialStore, InMemoryCredentialStore, RefreshCoordinator, TokenRefresher,
};
use carelink_domain::{Backend, Credential, HttpLogLevel, Result, TransportConfig};
use tracing::info;

use super::client::{ClientParts, TransportClient};
use super::logging::RequestLogger;
use super::refresher::HttpTokenRefresher;
use crate::analytics::TracingAnalyticsSink;
use crate::http::HttpClient;
use crate::observability::metrics::{TransportMetrics, TransportMetricsSnapshot};

/// Builder for [`TransportStack`].
pub struct TransportStackBuilder {
    config: TransportConfig,
    store: Option<Arc<dyn CredentialStore>>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    http_log_level: Option<HttpLogLevel>,
}

impl TransportStackBuilder {
    /// Defaults to an [`InMemoryCredentialStore`].
    #[must_use]
    pub fn credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to [`TracingAnalyticsSink`].
    #[must_use]
    pub fn analytics_sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    /// Replace the HTTP refresh call, e.g. with a scripted refresher in tests.
    #[must_use]
    pub fn token_refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Overrides the level from the configuration.
    #[must_use]
    pub fn http_log_level(mut self, level: HttpLogLevel) -> Self {
        self.http_log_level = Some(level);
        self
    }

    /// Validate the configuration and build both clients.
    ///
    /// # Errors
    /// Returns `TransportError::Config` for an invalid configuration, or the
    /// HTTP error raised while building a connection pool.
    pub fn build(self) -> Result<TransportStack> {
        let config = self.config;
        config.validate()?;

        let level = self.http_log_level.unwrap_or_else(|| config.http_log_level());
        let logger = RequestLogger::new(level);
        let store: Arc<dyn CredentialStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryCredentialStore::new()),
        };
        let analytics: Arc<dyn AnalyticsSink> = match self.analytics {
            Some(sink) => sink,
            None => Arc::new(TracingAnalyticsSink),
        };
        let metrics = Arc::new(TransportMetrics::new());

        let primary_http = HttpClient::for_backend(&config.primary, &config.pool)?;
        let identity_http = HttpClient::for_backend(&config.identity_registry, &config.pool)?;

        // The refresh call shares the primary pool but carries its own deadline.
        let refresher: Arc<dyn TokenRefresher> = match self.refresher {
            Some(refresher) => refresher,
            None => Arc::new(HttpTokenRefresher::new(primary_http.clone(), &config)?),
        };
        let coordinator =
            Arc::new(RefreshCoordinator::new(Backend::PrimarySync, store.clone(), refresher));

        let primary = TransportClient::from_parts(ClientParts {
            backend: Backend::PrimarySync,
            config: &config.primary,
            http: primary_http,
            store: store.clone(),
            coordinator: Some(coordinator.clone()),
            logger,
            analytics: analytics.clone(),
            metrics: metrics.clone(),
        })?;
        let identity_registry = TransportClient::from_parts(ClientParts {
            backend: Backend::IdentityRegistry,
            config: &config.identity_registry,
            http: identity_http,
            store: store.clone(),
            coordinator: None,
            logger,
            analytics,
            metrics: metrics.clone(),
        })?;

        info!(
            primary = %primary.base_url(),
            identity_registry = %identity_registry.base_url(),
            http_log_level = ?logger.level(),
            "transport stack ready"
        );

        Ok(TransportStack { config, store, coordinator, primary, identity_registry, metrics })
    }
}

/// Both backend clients plus the state they share.
pub struct TransportStack {
    config: TransportConfig,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    primary: TransportClient,
    identity_registry: TransportClient,
    metrics: Arc<TransportMetrics>,
}

impl TransportStack {
    pub fn builder(config: TransportConfig) -> TransportStackBuilder {
        TransportStackBuilder {
            config,
            store: None,
            analytics: None,
            refresher: None,
            http_log_level: None,
        }
    }

    /// Stack with default store, sink and refresher.
    ///
    /// # Errors
    /// See [`TransportStackBuilder::build`].
    pub fn new(config: TransportConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn client(&self, backend: Backend) -> &TransportClient {
        match backend {
            Backend::PrimarySync => &self.primary,
            Backend::IdentityRegistry => &self.identity_registry,
        }
    }

    pub fn primary(&self) -> &TransportClient {
        &self.primary
    }

    pub fn identity_registry(&self) -> &TransportClient {
        &self.identity_registry
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Install the credential obtained at login.
    ///
    /// # Errors
    /// Returns `TransportError::CredentialStore` if the store write fails.
    pub async fn sign_in(&self, backend: Backend, credential: Credential) -> Result<()> {
        self.store.set_credential(backend, credential).await?;
        info!(%backend, "signed in");
        Ok(())
    }

    /// Drop the credentials of every backend.
    ///
    /// # Errors
    /// Returns the first store failure; later backends are still cleared.
    pub async fn sign_out(&self) -> Result<()> {
        let mut first_error = None;
        for backend in Backend::ALL {
            if let Err(err) = self.store.clear(backend).await {
                first_error.get_or_insert(err);
            }
        }
        info!("signed out");
        first_error.map_or(Ok(()), Err)
    }

    /// Transport counters merged with the refresh coordinator's.
    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot().with_refresh_stats(self.coordinator.stats())
    }
}

impl std::fmt::Debug for TransportStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportStack")
            .field("primary", &self.primary)
            .field("identity_registry", &self.identity_registry)
            .finish_non_exhaustive()
    }
}
