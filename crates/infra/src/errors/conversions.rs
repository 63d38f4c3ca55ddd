//! Conversions from external infrastructure errors into transport errors.

use carelink_domain::{NetworkFailureKind, TransportError};
use reqwest::Error as HttpError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub TransportError);

impl From<InfraError> for TransportError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<TransportError> for InfraError {
    fn from(value: TransportError) -> Self {
        InfraError(value)
    }
}

/// Shorthand for `TransportError::from(InfraError::from(err))`.
pub fn http_error(err: HttpError) -> TransportError {
    InfraError::from(err).into()
}

trait IntoTransportError {
    fn into_transport(self) -> TransportError;
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → TransportError */
/* -------------------------------------------------------------------------- */

impl IntoTransportError for HttpError {
    fn into_transport(self) -> TransportError {
        if self.is_timeout() {
            return TransportError::network(
                NetworkFailureKind::Timeout,
                format!("HTTP request timed out: {self}"),
            );
        }

        #[cfg(not(target_arch = "wasm32"))]
        if self.is_connect() {
            return TransportError::network(
                NetworkFailureKind::Connect,
                format!("HTTP connection failure: {self}"),
            );
        }

        if self.is_builder() {
            return TransportError::InvalidRequest(format!("cannot build HTTP request: {self}"));
        }

        if self.is_decode() {
            return TransportError::Protocol(format!("cannot decode HTTP response: {self}"));
        }

        if let Some(status) = self.status() {
            return TransportError::Protocol(format!(
                "unexpected HTTP {} {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("unknown status")
            ));
        }

        TransportError::network(NetworkFailureKind::Other, self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_transport())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → TransportError */
/* -------------------------------------------------------------------------- */

impl IntoTransportError for serde_json::Error {
    fn into_transport(self) -> TransportError {
        TransportError::Protocol(format!("invalid JSON payload: {self}"))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(value.into_transport())
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::time::Duration;

    use reqwest::Client;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn deadline_expiry_maps_to_network_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client
            .get(server.uri())
            .timeout(Duration::from_millis(50))
            .send()
            .await
            .unwrap_err();

        match http_error(error) {
            TransportError::Network { kind, .. } => assert_eq!(kind, NetworkFailureKind::Timeout),
            other => panic!("expected network timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refused_connection_maps_to_network_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client.get(format!("http://{addr}")).send().await.unwrap_err();

        match http_error(error) {
            TransportError::Network { kind, .. } => assert_eq!(kind, NetworkFailureKind::Connect),
            other => panic!("expected connect failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_body_maps_to_protocol() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = Client::builder().no_proxy().build().unwrap();
        let error = client
            .get(server.uri())
            .send()
            .await
            .unwrap()
            .json::<serde_json::Value>()
            .await
            .unwrap_err();

        assert!(matches!(http_error(error), TransportError::Protocol(_)));
    }

    #[test]
    fn json_errors_map_to_protocol() {
        let error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let mapped: TransportError = InfraError::from(error).into();
        assert!(matches!(mapped, TransportError::Protocol(_)));
    }
}
