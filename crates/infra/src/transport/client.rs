//! Per-backend transport client
//!
//! A [`TransportClient`] owns one backend's connection pool and decorator
//! chain. [`TransportClient::execute`] drives an [`Exchange`]: decorate,
//! send, and on a 401 from a refreshable backend wait for the coalesced
//! refresh and re-issue the request exactly once.

use std::sync::Arc;
use std::time::{Duration, Instant};

use carelink_core::{AnalyticsSink, CredentialStore, Exchange, RefreshCoordinator, Step};
use carelink_domain::{
    AnalyticsEvent, Backend, BackendConfig, Credential, OutcomeClass, Result, Session,
    TransportError,
};
use chrono::Utc;
use reqwest::Request;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::decorator::{DecorationContext, DecoratorChain};
use super::logging::{AttemptContext, RequestLogger};
use super::request::OutboundRequest;
use super::response::TransportResponse;
use crate::errors::http_error;
use crate::http::HttpClient;
use crate::observability::metrics::TransportMetrics;

/// Collaborators handed to [`TransportClient::from_parts`] by the stack.
pub(crate) struct ClientParts<'a> {
    pub backend: Backend,
    pub config: &'a BackendConfig,
    pub http: HttpClient,
    pub store: Arc<dyn CredentialStore>,
    pub coordinator: Option<Arc<RefreshCoordinator>>,
    pub logger: RequestLogger,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub metrics: Arc<TransportMetrics>,
}

/// Authenticated client for one backend.
pub struct TransportClient {
    backend: Backend,
    base_url: Url,
    content_type: String,
    http: HttpClient,
    chain: DecoratorChain,
    store: Arc<dyn CredentialStore>,
    coordinator: Option<Arc<RefreshCoordinator>>,
    logger: RequestLogger,
    analytics: Arc<dyn AnalyticsSink>,
    metrics: Arc<TransportMetrics>,
}

/// Credential and session read once per exchange.
struct Identity {
    credential: Option<Credential>,
    session: Option<Session>,
}

impl TransportClient {
    pub(crate) fn from_parts(parts: ClientParts<'_>) -> Result<Self> {
        Ok(Self {
            backend: parts.backend,
            base_url: parts.config.parsed_base_url()?,
            content_type: parts.config.content_type.clone(),
            http: parts.http,
            chain: DecoratorChain::for_backend(parts.backend),
            store: parts.store,
            coordinator: parts.coordinator,
            logger: parts.logger,
            analytics: parts.analytics,
            metrics: parts.metrics,
        })
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Send `request` and return the final response.
    ///
    /// Every status except 401 is returned as a response. On the primary
    /// sync backend a 401 triggers one coalesced refresh and one retry; a
    /// 401 that survives the retry, or any 401 on a backend without a
    /// refresh path, is returned as `TransportError::Unauthorized`.
    ///
    /// # Errors
    /// - `TransportError::Network` if an attempt fails below HTTP
    /// - `TransportError::AuthenticationExpired` if the refresh fails
    /// - `TransportError::Unauthorized` for a final 401
    /// - `TransportError::CredentialStore` if the store cannot be read
    /// - `TransportError::InvalidRequest` if the request cannot be built
    #[instrument(
        skip(self, request),
        fields(backend = %self.backend, method = %request.method(), path = %request.path())
    )]
    pub async fn execute(&self, request: OutboundRequest) -> Result<TransportResponse> {
        let request = request.consume_exemption_marker();
        let correlation_id = Uuid::new_v4();
        let started = Instant::now();

        let mut exchange = Exchange::new(self.backend, self.refresh_enabled(&request));
        let outcome = self.run(&mut exchange, &request, correlation_id).await;

        self.finish(&exchange, &request, correlation_id, started.elapsed(), &outcome);
        outcome
    }

    /// GET `path` and decode a 2xx JSON body.
    ///
    /// # Errors
    /// Everything [`execute`](Self::execute) returns, plus
    /// `TransportError::Status` for a non-2xx response and
    /// `TransportError::Protocol` for an undecodable body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.execute(OutboundRequest::get(path)).await?;
        self.decode(&response)
    }

    /// POST `body` as JSON to `path` and decode a 2xx JSON body.
    ///
    /// # Errors
    /// Same as [`get_json`](Self::get_json).
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = OutboundRequest::post(path).json(body)?;
        let response = self.execute(request).await?;
        self.decode(&response)
    }

    fn refresh_enabled(&self, request: &OutboundRequest) -> bool {
        self.coordinator.is_some()
            && self.backend.supports_refresh()
            && !request.is_credential_exempt()
    }

    async fn run(
        &self,
        exchange: &mut Exchange,
        request: &OutboundRequest,
        correlation_id: Uuid,
    ) -> Result<TransportResponse> {
        let url = request.url(&self.base_url)?;
        let mut identity = self.identity(request).await?;

        exchange.dispatch().map_err(internal)?;
        loop {
            let decorated = self.chain.apply(
                request.clone(),
                &DecorationContext {
                    backend: self.backend,
                    content_type: &self.content_type,
                    credential: identity.credential.as_ref(),
                    session: identity.session.as_ref(),
                    correlation_id,
                },
            )?;

            let attempt = AttemptContext {
                backend: self.backend,
                attempt: exchange.attempts(),
                correlation_id,
                method: request.method(),
                url: &url,
            };
            let dispatched_at = Instant::now();
            let response = match self.send_attempt(&attempt, decorated).await {
                Ok(response) => response,
                Err(err) => {
                    exchange.on_transport_failure().map_err(internal)?;
                    return Err(err);
                }
            };

            match exchange.on_response(response.is_unauthorized()).map_err(internal)? {
                Step::Complete => return self.complete(response),
                Step::Refresh => {}
                Step::Retry => {
                    return Err(TransportError::Internal("retry requested without refresh".into()))
                }
            }

            let Some(coordinator) = self.coordinator.as_ref() else {
                return Err(TransportError::Internal(format!(
                    "{} has no refresh coordinator",
                    self.backend
                )));
            };

            self.metrics.record_refresh_wait();
            debug!(%correlation_id, "credential rejected, waiting for refresh");
            let refreshed = coordinator
                .refresh_after_rejection(identity.credential.as_ref(), dispatched_at)
                .await;
            match refreshed {
                Ok(fresh) => {
                    exchange.on_refresh_succeeded().map_err(internal)?;
                    self.metrics.record_retry();
                    identity.credential = Some(fresh);
                }
                Err(failure) => {
                    exchange.on_refresh_failed().map_err(internal)?;
                    warn!(%correlation_id, %failure, "refresh failed, re-authentication required");
                    return Err(TransportError::AuthenticationExpired(failure));
                }
            }
        }
    }

    /// Exempt requests never touch the store.
    async fn identity(&self, request: &OutboundRequest) -> Result<Identity> {
        if request.is_credential_exempt() {
            return Ok(Identity { credential: None, session: None });
        }
        let credential = self.store.get_current_credential(self.backend).await?;
        let session = match self.backend {
            Backend::PrimarySync => self.store.get_logged_in_user().await?,
            Backend::IdentityRegistry => None,
        };
        Ok(Identity { credential, session })
    }

    async fn send_attempt(
        &self,
        ctx: &AttemptContext<'_>,
        request: OutboundRequest,
    ) -> Result<TransportResponse> {
        let http_request = self.build_request(ctx.url, &request)?;
        self.logger.log_request(ctx, &http_request);
        self.metrics.record_attempt();

        let started = Instant::now();
        let result = match self.http.execute(http_request).await {
            Ok(response) => TransportResponse::read(response).await,
            Err(err) => Err(err),
        };

        match &result {
            Ok(response) => self.logger.log_response(ctx, response, started.elapsed()),
            Err(err) => self.logger.log_failure(ctx, err, started.elapsed()),
        }
        result
    }

    fn build_request(&self, url: &Url, request: &OutboundRequest) -> Result<Request> {
        let mut builder = self
            .http
            .request(request.method().clone(), url.clone())
            .headers(request.headers().clone());
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.to_vec());
        }
        builder.build().map_err(http_error)
    }

    fn complete(&self, response: TransportResponse) -> Result<TransportResponse> {
        if response.is_unauthorized() {
            return Err(TransportError::Unauthorized {
                backend: self.backend,
                status: response.status(),
            });
        }
        Ok(response)
    }

    fn decode<T: DeserializeOwned>(&self, response: &TransportResponse) -> Result<T> {
        if !response.is_success() {
            return Err(TransportError::Status {
                backend: self.backend,
                status: response.status(),
                body: response.text().into_owned(),
            });
        }
        response.json()
    }

    fn finish(
        &self,
        exchange: &Exchange,
        request: &OutboundRequest,
        correlation_id: Uuid,
        latency: Duration,
        outcome: &Result<TransportResponse>,
    ) {
        let (class, status) = classify(outcome);
        self.metrics.record_outcome(class);
        self.analytics.record(AnalyticsEvent {
            timestamp: Utc::now(),
            backend: self.backend,
            method: request.method().to_string(),
            path: request.path().to_string(),
            outcome: class,
            status,
            latency,
            correlation_id,
            attempts: exchange.attempts(),
            refreshed: exchange.attempts() > 1,
        });
    }
}

impl std::fmt::Debug for TransportClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportClient")
            .field("backend", &self.backend)
            .field("base_url", &self.base_url.as_str())
            .field("chain", &self.chain)
            .field("refresh", &self.coordinator.is_some())
            .finish_non_exhaustive()
    }
}

fn classify(outcome: &Result<TransportResponse>) -> (OutcomeClass, Option<u16>) {
    match outcome {
        Ok(response) => (OutcomeClass::from_status(response.status()), Some(response.status())),
        Err(TransportError::Unauthorized { status, .. }) => {
            (OutcomeClass::Unauthorized, Some(*status))
        }
        Err(TransportError::AuthenticationExpired(_)) => {
            (OutcomeClass::AuthenticationExpired, Some(401))
        }
        Err(TransportError::Network { .. }) => (OutcomeClass::NetworkFailure, None),
        Err(_) => (OutcomeClass::Failed, None),
    }
}

fn internal(err: impl std::fmt::Display) -> TransportError {
    TransportError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use carelink_core::testing::{RecordingAnalyticsSink, ScriptedRefresher};
    use carelink_core::{InMemoryCredentialStore, SwapOutcome};
    use carelink_domain::{HttpLogLevel, NetworkFailureKind, RefreshFailure, UserId};
    use reqwest::header::HeaderMap;
    use reqwest::StatusCode;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    /// Store whose every call fails.
    struct BrokenStore;

    #[async_trait]
    impl CredentialStore for BrokenStore {
        async fn get_current_credential(&self, _: Backend) -> Result<Option<Credential>> {
            Err(TransportError::CredentialStore("disk gone".into()))
        }

        async fn get_logged_in_user(&self) -> Result<Option<Session>> {
            Err(TransportError::CredentialStore("disk gone".into()))
        }

        async fn set_credential(&self, _: Backend, _: Credential) -> Result<()> {
            Err(TransportError::CredentialStore("disk gone".into()))
        }

        async fn compare_and_set(
            &self,
            _: Backend,
            _: Option<&str>,
            _: Credential,
        ) -> Result<SwapOutcome> {
            Err(TransportError::CredentialStore("disk gone".into()))
        }

        async fn clear(&self, _: Backend) -> Result<()> {
            Err(TransportError::CredentialStore("disk gone".into()))
        }
    }

    struct Fixture {
        client: TransportClient,
        sink: Arc<RecordingAnalyticsSink>,
        metrics: Arc<TransportMetrics>,
    }

    fn fixture(
        server: &MockServer,
        store: Arc<dyn CredentialStore>,
        refresher: Option<Arc<ScriptedRefresher>>,
    ) -> Fixture {
        let backend = Backend::PrimarySync;
        let config = BackendConfig::primary_sync(server.uri());
        let sink = Arc::new(RecordingAnalyticsSink::new());
        let metrics = Arc::new(TransportMetrics::new());
        let coordinator = refresher
            .map(|r| Arc::new(RefreshCoordinator::new(backend, store.clone(), r)));
        let client = TransportClient::from_parts(ClientParts {
            backend,
            config: &config,
            http: HttpClient::new().unwrap(),
            store,
            coordinator,
            logger: RequestLogger::new(HttpLogLevel::Basic),
            analytics: sink.clone(),
            metrics: metrics.clone(),
        })
        .unwrap();
        Fixture { client, sink, metrics }
    }

    fn logged_in(token: &str) -> Arc<InMemoryCredentialStore> {
        Arc::new(InMemoryCredentialStore::with_login(
            Session::new(UserId::from(42)),
            Credential::new(token).with_refresh_token("R1"),
        ))
    }

    #[tokio::test]
    async fn refresh_then_retry_uses_the_new_token() {
        let server = MockServer::start().await;
        Mock::given(header("jwttoken", "T1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(header("jwttoken", "T2"))
            .and(header("userid", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = Arc::new(ScriptedRefresher::succeeding("T2"));
        let fx = fixture(&server, logged_in("T1"), Some(refresher.clone()));

        let response = fx.client.execute(OutboundRequest::get("/beneficiary")).await.unwrap();

        assert_eq!(response.text(), "ok");
        assert_eq!(refresher.calls(), 1);
        let events = fx.sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attempts, 2);
        assert!(events[0].refreshed);
        assert_eq!(events[0].outcome, OutcomeClass::Success);
    }

    #[tokio::test]
    async fn client_without_coordinator_surfaces_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, logged_in("T1"), None);

        let result = fx.client.execute(OutboundRequest::get("/x")).await;

        assert!(matches!(result, Err(TransportError::Unauthorized { status: 401, .. })));
        assert_eq!(fx.metrics.snapshot().unauthorized, 1);
    }

    #[tokio::test]
    async fn exempt_request_skips_the_store_entirely() {
        let server = MockServer::start().await;
        Mock::given(path("/login"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let fx = fixture(&server, Arc::new(BrokenStore), None);
        let request = OutboundRequest::post("/login").header("No-Auth", "true").unwrap();

        let response = fx.client.execute(request).await.unwrap();
        assert!(response.is_success());

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get("no-auth").is_none());
        assert!(received[0].headers.get("jwttoken").is_none());
    }

    #[tokio::test]
    async fn store_failure_fails_the_exchange_before_any_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let fx = fixture(&server, Arc::new(BrokenStore), None);

        let result = fx.client.execute(OutboundRequest::get("/x")).await;

        assert!(matches!(result, Err(TransportError::CredentialStore(_))));
        assert_eq!(fx.sink.events()[0].outcome, OutcomeClass::Failed);
        assert_eq!(fx.sink.events()[0].attempts, 0);
    }

    #[tokio::test]
    async fn server_errors_are_responses_and_status_errors_in_json_helpers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let fx = fixture(&server, logged_in("T1"), None);

        let response = fx.client.execute(OutboundRequest::get("/x")).await.unwrap();
        assert_eq!(response.status(), 503);

        match fx.client.get_json::<serde_json::Value>("/x").await {
            Err(TransportError::Status { status, body, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "maintenance");
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_failure_is_authentication_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = Arc::new(ScriptedRefresher::failing(RefreshFailure::rejected("revoked")));
        let fx = fixture(&server, logged_in("T1"), Some(refresher));

        let result = fx.client.execute(OutboundRequest::get("/x")).await;

        assert!(matches!(result, Err(TransportError::AuthenticationExpired(_))));
        assert_eq!(fx.sink.events()[0].outcome, OutcomeClass::AuthenticationExpired);
    }

    #[test]
    fn outcomes_are_classified() {
        let ok = Ok(TransportResponse::new(StatusCode::NOT_FOUND, HeaderMap::new(), Vec::new()));
        assert_eq!(classify(&ok), (OutcomeClass::ClientError, Some(404)));

        let network = Err(TransportError::network(NetworkFailureKind::Timeout, "deadline"));
        assert_eq!(classify(&network), (OutcomeClass::NetworkFailure, None));

        let invalid = Err(TransportError::InvalidRequest("bad".into()));
        assert_eq!(classify(&invalid), (OutcomeClass::Failed, None));
    }
}
