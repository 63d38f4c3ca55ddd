use std::time::Duration;

use carelink_domain::{BackendConfig, PoolConfig, Result};
use reqwest::{Client as ReqwestClient, Method, Request, RequestBuilder, Response};
use tracing::debug;

use crate::errors::http_error;

/// HTTP client over one connection pool, with fixed deadlines.
///
/// Issues exactly one attempt per call. Retrying is the exchange's decision,
/// never the client's.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: ReqwestClient,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Convenience constructor with default configuration.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Client carrying a backend's deadlines and the shared pool settings.
    pub fn for_backend(backend: &BackendConfig, pool: &PoolConfig) -> Result<Self> {
        let timeouts = backend.timeouts;
        Self::builder()
            .connect_timeout(timeouts.connect())
            .read_timeout(Duration::from_secs(timeouts.read_secs))
            .timeout(timeouts.total())
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .pool_idle_timeout(Duration::from_secs(pool.idle_timeout_secs))
            .user_agent(pool.user_agent.clone())
            .build()
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Build and execute the request.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().map_err(http_error)?;
        self.execute(request).await
    }

    /// Execute an already built request.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        match self.client.execute(request).await {
            Ok(response) => {
                debug!(%method, %url, status = %response.status(), "received HTTP response");
                Ok(response)
            }
            Err(err) => {
                debug!(%method, %url, error = %err, "HTTP request failed");
                Err(http_error(err))
            }
        }
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    timeout: Duration,
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Duration,
    user_agent: Option<String>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            read_timeout: None,
            timeout: Duration::from_secs(30),
            pool_max_idle_per_host: carelink_domain::constants::DEFAULT_POOL_MAX_IDLE_PER_HOST,
            pool_idle_timeout: Duration::from_secs(
                carelink_domain::constants::DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            ),
            user_agent: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Deadline between two successful reads of the response.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Deadline for a whole attempt, from connect to the last body byte.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = max;
        self
    }

    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut builder = ReqwestClient::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(self.pool_idle_timeout)
            .no_proxy();

        if let Some(read_timeout) = self.read_timeout {
            builder = builder.read_timeout(read_timeout);
        }

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        let client = builder.build().map_err(http_error)?;

        Ok(HttpClient { client })
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use carelink_domain::{NetworkFailureKind, TransportError};
    use reqwest::{Method, StatusCode};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn server_errors_are_returned_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new().expect("http client");
        let response =
            client.send(client.request(Method::GET, server.uri())).await.expect("response");

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_single_network_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .expect(1)
            .mount(&server)
            .await;

        let client =
            HttpClient::builder().timeout(Duration::from_millis(50)).build().expect("http client");

        match client.send(client.request(Method::GET, server.uri())).await {
            Err(TransportError::Network { kind, .. }) => {
                assert_eq!(kind, NetworkFailureKind::Timeout);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener); // release the port so that requests fail with ECONNREFUSED
        let url = format!("http://{addr}");

        let client = HttpClient::new().expect("http client");

        match client.send(client.request(Method::GET, &url)).await {
            Err(TransportError::Network { kind, .. }) => {
                assert_eq!(kind, NetworkFailureKind::Connect);
            }
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[test]
    fn backend_profile_builds() {
        let backend = BackendConfig::identity_registry("https://abha.example.org");
        assert!(HttpClient::for_backend(&backend, &PoolConfig::default()).is_ok());
    }
}
