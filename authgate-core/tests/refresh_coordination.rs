//! Integration tests for the refresh-coordination subsystem.
//!
//! These tests verify that the gateway and coordinator together:
//! - Perform exactly one renewal for N concurrent authorization failures
//! - Retry each original request exactly once with the fresh credential
//! - Keep the previous renewal token when the renewal response omits one
//! - Treat renewal rejection as terminal (cleared store, one callback)
//! - Return to idle after a failed cycle so a later cycle can run

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use authgate_core::{
    AuthError, CredentialStore, MemoryStore, RenewalCoordinator, ReqwestTransport, RequestGateway,
    Secret, TransportError,
};
use url::Url;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type TestGateway = RequestGateway<MemoryStore, ReqwestTransport>;

/// Gateway over a seeded A1/R1 pair, pointing at the mock server.
async fn setup_gateway(server: &MockServer) -> (TestGateway, Arc<CredentialStore<MemoryStore>>) {
    let credentials = Arc::new(CredentialStore::new(MemoryStore::new()));
    credentials
        .set_pair(&Secret::new("A1"), &Secret::new("R1"))
        .await
        .unwrap();

    let gateway = RequestGateway::new(
        credentials.clone(),
        Arc::new(RenewalCoordinator::new()),
        Arc::new(ReqwestTransport::new()),
        Url::parse(&format!("{}/auth/refresh", server.uri())).unwrap(),
    );

    (gateway, credentials)
}

fn data_url(server: &MockServer) -> Url {
    Url::parse(&format!("{}/data", server.uri())).unwrap()
}

#[tokio::test]
async fn test_three_concurrent_401s_share_one_renewal() {
    let server = MockServer::start().await;

    // The renewal is slow enough that all three failures arrive while it is
    // in flight, and it must be called exactly once.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("R1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(150))
                .set_body_json(serde_json::json!({ "accessToken": "A2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    // Every retry must carry the fresh credential.
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .expect(3)
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;
    let url = data_url(&server);

    let (a, b, c) = tokio::join!(
        gateway.get(url.clone()),
        gateway.get(url.clone()),
        gateway.get(url.clone()),
    );

    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    assert!(c.unwrap().is_success());

    // Access rotated; the renewal token was not rotated and must survive.
    assert_eq!(
        credentials.get_access().await.unwrap().unwrap().expose(),
        "A2"
    );
    assert_eq!(
        credentials.get_renewal().await.unwrap().unwrap().expose(),
        "R1"
    );
}

#[tokio::test]
async fn test_renewal_rejection_fails_all_waiters_with_one_callback() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_delay(Duration::from_millis(150))
                .set_body_json(serde_json::json!({ "error": "invalid_grant" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;
    let expired = Arc::new(AtomicUsize::new(0));
    let expired_seen = expired.clone();
    let gateway = gateway.with_error_callback(Arc::new(move |_| {
        expired_seen.fetch_add(1, Ordering::SeqCst);
    }));
    let url = data_url(&server);

    let (a, b, c) = tokio::join!(
        gateway.get(url.clone()),
        gateway.get(url.clone()),
        gateway.get(url.clone()),
    );

    for result in [a, b, c] {
        assert!(matches!(result, Err(AuthError::SessionExpired)));
    }

    assert_eq!(expired.load(Ordering::SeqCst), 1);
    assert!(!credentials.has_pair().await.unwrap());
    assert!(credentials.get_access().await.unwrap().is_none());
    assert!(credentials.get_renewal().await.unwrap().is_none());
}

#[tokio::test]
async fn test_retried_request_is_not_renewed_a_second_time() {
    let server = MockServer::start().await;

    // Renewal succeeds, but the resource rejects the fresh token too.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "A2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;

    let result = gateway.get(data_url(&server)).await;
    assert!(matches!(result, Err(AuthError::SessionExpired)));
    assert!(!credentials.has_pair().await.unwrap());
}

#[tokio::test]
async fn test_failed_cycle_resets_for_a_fresh_one() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;
    let url = data_url(&server);

    // First cycle: the renewal endpoint is down.
    {
        let _failing = Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount_as_scoped(&server)
            .await;

        let result = gateway.get(url.clone()).await;
        assert!(matches!(result, Err(AuthError::SessionExpired)));
    }

    // The terminal failure cleared the store; a fresh login would reseed it.
    credentials
        .set_pair(&Secret::new("A1"), &Secret::new("R1"))
        .await
        .unwrap();

    // Second, independent cycle starts from idle and succeeds.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("R1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "A2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = gateway.get(url).await.unwrap();
    assert!(response.is_success());
    assert_eq!(
        credentials.get_access().await.unwrap().unwrap().expose(),
        "A2"
    );
}

#[tokio::test]
async fn test_renewal_response_with_rotated_pair_persists_both() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "A2",
            "refreshToken": "R2",
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;

    let response = gateway.get(data_url(&server)).await.unwrap();
    assert!(response.is_success());

    assert_eq!(
        credentials.get_access().await.unwrap().unwrap().expose(),
        "A2"
    );
    assert_eq!(
        credentials.get_renewal().await.unwrap().unwrap().expose(),
        "R2"
    );
}

#[tokio::test]
async fn test_renewal_with_out_of_range_lifetime_still_completes() {
    let server = MockServer::start().await;

    // A hostile or buggy endpoint may claim an absurd token lifetime; the
    // renewal must complete and simply skip the expiry bookkeeping.
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("R1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "accessToken": "A2",
            "expiresIn": 10_000_000_000_000_000u64,
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;

    let response = gateway.get(data_url(&server)).await.unwrap();
    assert!(response.is_success());

    assert_eq!(
        credentials.get_access().await.unwrap().unwrap().expose(),
        "A2"
    );
    assert!(credentials.expires_at().await.unwrap().is_none());
}

#[tokio::test]
async fn test_slow_response_times_out_as_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(400))
                .set_body_json(serde_json::json!({ "ok": true })),
        )
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;
    let gateway = gateway.with_request_timeout(Duration::from_millis(100));

    let result = gateway.get(data_url(&server)).await;
    assert!(matches!(
        result,
        Err(AuthError::Transport(TransportError::Timeout { .. }))
    ));

    // No renewal cycle ran and nothing was cleared.
    assert!(credentials.has_pair().await.unwrap());
}

#[tokio::test]
async fn test_renewal_timeout_fails_the_cycle_but_not_the_coordinator() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer A2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "ok": true })))
        .mount(&server)
        .await;

    let credentials = Arc::new(CredentialStore::new(MemoryStore::new()));
    credentials
        .set_pair(&Secret::new("A1"), &Secret::new("R1"))
        .await
        .unwrap();
    let coordinator = Arc::new(RenewalCoordinator::new());
    let gateway = RequestGateway::new(
        credentials.clone(),
        coordinator.clone(),
        Arc::new(ReqwestTransport::new()),
        Url::parse(&format!("{}/auth/refresh", server.uri())).unwrap(),
    )
    .with_request_timeout(Duration::from_millis(100));
    let url = data_url(&server);

    // First cycle: the renewal endpoint is too slow and the exchange
    // times out.
    {
        let _slow = Mock::given(method("POST"))
            .and(path("/auth/refresh"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(400))
                    .set_body_json(serde_json::json!({ "accessToken": "A2" })),
            )
            .mount_as_scoped(&server)
            .await;

        let result = gateway.get(url.clone()).await;
        assert!(matches!(result, Err(AuthError::SessionExpired)));
    }

    // The timeout settled the cycle rather than wedging it.
    assert!(!coordinator.is_in_flight());

    // With fresh credentials and a responsive endpoint, the next cycle
    // runs normally.
    credentials
        .set_pair(&Secret::new("A1"), &Secret::new("R1"))
        .await
        .unwrap();
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_string_contains("R1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "accessToken": "A2" })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = gateway.get(url).await.unwrap();
    assert!(response.is_success());
}

#[tokio::test]
async fn test_non_authorization_failure_is_returned_unchanged() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (gateway, credentials) = setup_gateway(&server).await;

    let response = gateway.get(data_url(&server)).await.unwrap();
    assert_eq!(response.status.as_u16(), 500);

    // No renewal cycle ran and nothing was cleared.
    assert!(credentials.has_pair().await.unwrap());
}
