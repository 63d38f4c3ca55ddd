//! Integration tests for the authenticated transport
//!
//! **Coverage:**
//! - Refresh then retry with the new token
//! - Concurrent 401s collapse into one refresh RPC, even when it fails
//! - Refresh rejection fails every waiting exchange and leaves the store alone
//! - No second refresh after a rejected retry
//! - Header correctness on both backends and credential exemption
//! - Network failures stay distinguishable from authentication failures
//! - Refresh survives cancellation of the exchange that started it
//!
//! **Infrastructure:**
//! - One WireMock server per backend
//! - Full `TransportStack`, including the HTTP refresh call

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

#[path = "support.rs"]
mod support;

use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use carelink_core::testing::ScriptedRefresher;
use carelink_domain::{
    Backend, ErrorCategory, NetworkFailureKind, OutcomeClass, RefreshFailureReason,
    TransportConfig, TransportError,
};
use carelink_infra::{OutboundRequest, TransportStack};
use futures::future::join_all;
use serde_json::json;
use support::{count_on_path, count_with_header, Harness, REFRESH_PATH};
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn refresh_success(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "statusCode": 200,
        "data": { "jwtToken": token, "refreshToken": format!("R-{token}") }
    }))
}

// ============================================================================
// Refresh and retry
// ============================================================================

#[tokio::test]
async fn expired_token_is_refreshed_and_the_request_retried() {
    let h = Harness::start().await;
    Mock::given(path("/beneficiary"))
        .and(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(body_json(json!({ "refreshToken": "R1" })))
        .respond_with(refresh_success("T2"))
        .expect(1)
        .mount(&h.primary)
        .await;
    Mock::given(path("/beneficiary"))
        .and(header("jwttoken", "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 7 })))
        .expect(1)
        .mount(&h.primary)
        .await;

    let body: serde_json::Value = h.stack.primary().get_json("/beneficiary").await.unwrap();

    assert_eq!(body, json!({ "id": 7 }));
    assert_eq!(h.primary_token().as_deref(), Some("T2"));

    let event = &h.sink.events()[0];
    assert_eq!(event.attempts, 2);
    assert!(event.refreshed);
    assert_eq!(event.outcome, OutcomeClass::Success);

    let metrics = h.stack.metrics();
    assert_eq!(metrics.attempts, 2);
    assert_eq!(metrics.retries, 1);
    assert_eq!(metrics.refreshes_started, 1);
}

#[tokio::test]
async fn concurrent_rejections_share_one_refresh() {
    let h = Harness::start().await;
    Mock::given(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(100)))
        .expect(5)
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_success("T2").set_delay(Duration::from_millis(50)))
        .expect(1)
        .mount(&h.primary)
        .await;
    Mock::given(header("jwttoken", "T2"))
        .respond_with(ResponseTemplate::new(200))
        .expect(5)
        .mount(&h.primary)
        .await;

    let client = h.stack.primary();
    let results = join_all(
        (0..5).map(|i| client.execute(OutboundRequest::get(format!("/records/{i}")))),
    )
    .await;

    for result in results {
        assert_eq!(result.unwrap().status(), 200);
    }
    assert_eq!(count_on_path(&h.primary, REFRESH_PATH).await, 1);
    assert_eq!(count_with_header(&h.primary, "jwttoken", "T2").await, 5);

    let metrics = h.stack.metrics();
    assert_eq!(metrics.refreshes_started, 1);
    assert_eq!(metrics.refresh_waits, 5);
    assert_eq!(metrics.successes, 5);
}

#[tokio::test]
async fn rejected_refresh_expires_every_waiting_exchange() {
    let h = Harness::start().await;
    Mock::given(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(100)))
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 5002,
            "errorMessage": "refresh token expired"
        })))
        .expect(1)
        .mount(&h.primary)
        .await;

    let client = h.stack.primary();
    let results =
        join_all((0..5).map(|_| client.execute(OutboundRequest::get("/records")))).await;

    for result in results {
        match result {
            Err(TransportError::AuthenticationExpired(failure)) => {
                assert_eq!(failure.reason, RefreshFailureReason::Rejected);
            }
            other => panic!("expected authentication expiry, got {other:?}"),
        }
    }
    assert_eq!(h.primary_token().as_deref(), Some("T1"));

    // The dead credential is not refreshed a second time.
    let again = client.execute(OutboundRequest::get("/records")).await;
    assert!(matches!(again, Err(TransportError::AuthenticationExpired(_))));
    assert_eq!(count_on_path(&h.primary, REFRESH_PATH).await, 1);
    assert_eq!(h.stack.metrics().authentication_expired, 6);
}

#[tokio::test]
async fn rejected_retry_is_not_refreshed_again() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_success("T2"))
        .expect(1)
        .mount(&h.primary)
        .await;

    let result = h.stack.primary().execute(OutboundRequest::get("/records")).await;

    assert!(matches!(
        result,
        Err(TransportError::Unauthorized { backend: Backend::PrimarySync, status: 401 })
    ));
    let event = &h.sink.events()[0];
    assert_eq!(event.attempts, 2);
    assert_eq!(event.outcome, OutcomeClass::Unauthorized);
}

#[tokio::test]
async fn unreachable_refresh_endpoint_is_transient() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(refresh_success("T2"))
        .mount(&h.primary)
        .await;
    Mock::given(method("GET"))
        .and(header("jwttoken", "T2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&h.primary)
        .await;

    let first = h.stack.primary().execute(OutboundRequest::get("/records")).await;
    match first {
        Err(TransportError::AuthenticationExpired(failure)) => {
            assert_eq!(failure.reason, RefreshFailureReason::Network);
        }
        other => panic!("expected authentication expiry, got {other:?}"),
    }

    let second = h.stack.primary().execute(OutboundRequest::get("/records")).await.unwrap();
    assert_eq!(second.status(), 200);
    assert_eq!(count_on_path(&h.primary, REFRESH_PATH).await, 2);
}

#[tokio::test]
async fn late_rejection_shares_the_transient_refresh_failure() {
    let h = Harness::start().await;
    Mock::given(path("/fast"))
        .and(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&h.primary)
        .await;
    Mock::given(path("/slow"))
        .and(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.primary)
        .await;

    let client = h.stack.primary();
    let results = join_all([
        client.execute(OutboundRequest::get("/fast")),
        client.execute(OutboundRequest::get("/slow")),
    ])
    .await;

    for result in results {
        match result {
            Err(TransportError::AuthenticationExpired(failure)) => {
                assert_eq!(failure.reason, RefreshFailureReason::Network);
            }
            other => panic!("expected authentication expiry, got {other:?}"),
        }
    }
    assert_eq!(count_on_path(&h.primary, REFRESH_PATH).await, 1);
}

// ============================================================================
// Headers and exemption
// ============================================================================

#[tokio::test]
async fn primary_requests_carry_token_and_user_id_only() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/sync"))
        .and(header("jwttoken", "T1"))
        .and(header("userid", "42"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "saved": true })))
        .expect(1)
        .mount(&h.primary)
        .await;

    let saved: serde_json::Value =
        h.stack.primary().post_json("/sync", &json!({ "visits": [] })).await.unwrap();

    assert_eq!(saved["saved"], true);
    let received = h.primary.received_requests().await.unwrap();
    assert!(received[0].headers.get("authorization").is_none());
    assert!(received[0].headers.get("x-correlation-id").is_some());
}

#[tokio::test]
async fn identity_registry_requests_carry_bearer_only() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.identity)
        .await;

    let request = OutboundRequest::get("/v1/account").header("Jwttoken", "smuggled").unwrap();
    let response = h.stack.identity_registry().execute(request).await.unwrap();

    assert_eq!(response.status(), 200);
    let received = h.identity.received_requests().await.unwrap();
    assert!(received[0].headers.get("jwttoken").is_none());
    assert!(received[0].headers.get("userid").is_none());
}

#[tokio::test]
async fn exempt_requests_reach_the_network_without_credentials() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.primary)
        .await;
    Mock::given(method("POST"))
        .and(path("/otp"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&h.identity)
        .await;

    let login = OutboundRequest::post("/login").header("No-Auth", "true").unwrap();
    h.stack.primary().execute(login).await.unwrap();
    let otp = OutboundRequest::post("/otp").credential_exempt();
    h.stack.identity_registry().execute(otp).await.unwrap();

    for server in [&h.primary, &h.identity] {
        let received = server.received_requests().await.unwrap();
        for name in ["jwttoken", "userid", "authorization", "no-auth"] {
            assert!(received[0].headers.get(name).is_none(), "{name} was sent");
        }
    }
}

#[tokio::test]
async fn exempt_401_is_not_refreshed() {
    let h = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.primary)
        .await;

    let login = OutboundRequest::post("/login").credential_exempt();
    let result = h.stack.primary().execute(login).await;

    assert!(matches!(result, Err(TransportError::Unauthorized { .. })));
    assert_eq!(count_on_path(&h.primary, REFRESH_PATH).await, 0);
}

#[tokio::test]
async fn identity_registry_401_surfaces_immediately() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&h.identity)
        .await;

    let result = h.stack.identity_registry().execute(OutboundRequest::get("/v1/account")).await;

    match result {
        Err(err @ TransportError::Unauthorized { backend: Backend::IdentityRegistry, .. }) => {
            assert!(err.requires_reauthentication());
        }
        other => panic!("expected unauthorized, got {other:?}"),
    }
    assert_eq!(count_on_path(&h.primary, REFRESH_PATH).await, 0);
    assert_eq!(h.stack.metrics().refresh_waits, 0);
}

// ============================================================================
// Failure classification
// ============================================================================

#[tokio::test]
async fn refused_connection_is_a_retryable_network_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let closed = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let primary = MockServer::start().await;
    let identity = MockServer::start().await;
    let config = TransportConfig::new(primary.uri(), closed);
    let h = Harness::with_config(primary, identity, config);

    let result = h.stack.identity_registry().execute(OutboundRequest::get("/v1/account")).await;

    match result {
        Err(err @ TransportError::Network { kind: NetworkFailureKind::Connect, .. }) => {
            assert_eq!(err.category(), ErrorCategory::Network);
            assert!(err.is_retryable());
            assert!(!err.requires_reauthentication());
        }
        other => panic!("expected network failure, got {other:?}"),
    }
    assert_eq!(h.sink.events()[0].outcome, OutcomeClass::NetworkFailure);
    assert_eq!(h.stack.metrics().network_failures, 1);
}

#[tokio::test]
async fn undecodable_body_is_a_protocol_failure() {
    let h = Harness::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&h.primary)
        .await;

    let result = h.stack.primary().get_json::<serde_json::Value>("/records").await;

    assert!(matches!(result, Err(TransportError::Protocol(_))));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancelled_exchange_does_not_cancel_its_refresh() {
    let primary = MockServer::start().await;
    Mock::given(header("jwttoken", "T1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&primary)
        .await;

    let refresher = Arc::new(ScriptedRefresher::succeeding("T2").gated());
    let store = Arc::new(carelink_core::InMemoryCredentialStore::with_login(
        carelink_domain::Session::new(carelink_domain::UserId::from(support::USER_ID)),
        carelink_domain::Credential::new("T1").with_refresh_token("R1"),
    ));
    let stack = Arc::new(
        TransportStack::builder(TransportConfig::new(primary.uri(), "https://abha.example.org"))
            .credential_store(store.clone())
            .token_refresher(refresher.clone())
            .build()
            .unwrap(),
    );

    let exchange = {
        let stack = stack.clone();
        tokio::spawn(async move { stack.primary().execute(OutboundRequest::get("/x")).await })
    };
    refresher.wait_for_calls(1).await;
    exchange.abort();
    refresher.release();

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.snapshot(Backend::PrimarySync).map(|c| c.access_token).as_deref()
            != Some("T2")
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("refresh should commit after the exchange was cancelled");
    assert_eq!(refresher.calls(), 1);
}
