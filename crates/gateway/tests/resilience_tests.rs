//! Upstream client behavior against a mock credential authority.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use gateway::config::GatewayConfig;
use gateway::errors::GatewayError;
use gateway::upstream::UpstreamClient;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn test_config(uri: &str) -> GatewayConfig {
    GatewayConfig {
        auth_service_url: uri.trim_end_matches('/').to_string(),
        breaker_failure_threshold: 5,
        breaker_window: Duration::from_secs(30),
        // Short cooldown so recovery tests run quickly.
        breaker_cooldown: Duration::from_millis(200),
        bulkhead_max_concurrency: 8,
        bulkhead_queue_limit: 8,
        bulkhead_queue_timeout: Duration::from_millis(500),
        retry_max: 0,
        retry_base_backoff: Duration::from_millis(1),
        retry_max_jitter: Duration::ZERO,
    }
}

#[tokio::test]
async fn test_circuit_opens_after_threshold_and_fast_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&test_config(&server.uri())).unwrap();

    for _ in 0..5 {
        let result = client.me("token").await;
        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
    }

    // The expect(5) above proves this never reaches the network.
    let result = client.me("token").await;
    assert!(matches!(result, Err(GatewayError::CircuitOpen)));

    server.verify().await;
}

#[tokio::test]
async fn test_probe_success_closes_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(5)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "user-1"})))
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&test_config(&server.uri())).unwrap();

    for _ in 0..5 {
        let _ = client.me("token").await;
    }
    assert!(matches!(
        client.me("token").await,
        Err(GatewayError::CircuitOpen)
    ));

    tokio::time::sleep(Duration::from_millis(250)).await;

    // The probe hits the now-healthy upstream and closes the circuit.
    let probe = client.me("token").await.unwrap();
    assert_eq!(probe.status, 200);

    let after = client.me("token").await.unwrap();
    assert_eq!(after.data, json!({"sub": "user-1"}));
}

#[tokio::test]
async fn test_probe_failure_reopens_circuit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&test_config(&server.uri())).unwrap();

    for _ in 0..5 {
        let _ = client.me("token").await;
    }

    tokio::time::sleep(Duration::from_millis(250)).await;

    let probe = client.me("token").await;
    assert!(matches!(probe, Err(GatewayError::Unavailable(_))));

    // Straight back to fast-fail for another full cooldown.
    let result = client.me("token").await;
    assert!(matches!(result, Err(GatewayError::CircuitOpen)));
}

#[tokio::test]
async fn test_idempotent_call_retries_through_5xx() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/auth/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sub": "user-1"})))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.retry_max = 2;
    let client = UpstreamClient::new(&config).unwrap();

    let response = client.me("token").await.unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!({"sub": "user-1"}));

    server.verify().await;
}

#[tokio::test]
async fn test_mutating_call_is_never_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.retry_max = 2;
    let client = UpstreamClient::new(&config).unwrap();

    let result = client.login(&json!({"email": "a@b.c"})).await;
    assert!(matches!(result, Err(GatewayError::Unavailable(_))));

    server.verify().await;
}

#[tokio::test]
async fn test_4xx_passes_through_and_does_not_trip_breaker() {
    let server = MockServer::start().await;
    let body = json!({"error": {"code": "invalid_credentials"}});
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(401).set_body_json(body.clone()))
        .expect(6)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&test_config(&server.uri())).unwrap();

    // Six straight 401s, one past the failure threshold. Every one still
    // reaches the upstream because 4xx counts as breaker success.
    for _ in 0..6 {
        match client.login(&json!({"email": "a@b.c"})).await {
            Err(GatewayError::UpstreamStatus { status, body: got }) => {
                assert_eq!(status, 401);
                assert_eq!(got, body);
            }
            other => panic!("expected UpstreamStatus, got {other:?}"),
        }
    }

    server.verify().await;
}

#[tokio::test]
async fn test_bulkhead_rejects_overflow_and_times_out_waiters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "ok"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.bulkhead_max_concurrency = 2;
    config.bulkhead_queue_limit = 1;
    config.bulkhead_queue_timeout = Duration::from_millis(100);
    let client = Arc::new(UpstreamClient::new(&config).unwrap());

    // Two calls occupy both slots for ~500ms.
    let first = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.health().await }
    });
    let second = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.health().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Third call takes the single queue slot and will outwait its 100ms
    // budget, since the slots stay busy for another ~450ms.
    let third = tokio::spawn({
        let client = Arc::clone(&client);
        async move { client.health().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Fourth call overflows the queue and is rejected immediately.
    let fourth = client.health().await;
    assert!(matches!(fourth, Err(GatewayError::QueueFull)));

    let third = third.await.unwrap();
    assert!(matches!(third, Err(GatewayError::QueueTimeout)));

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_response_exposes_status_headers_and_data() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-request-id", "req-42")
                .set_body_json(json!({"status": "ok"})),
        )
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&test_config(&server.uri())).unwrap();
    let response = client.health().await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.data, json!({"status": "ok"}));
    assert_eq!(
        response.headers.get("x-request-id").unwrap().to_str().unwrap(),
        "req-42"
    );
}

#[tokio::test]
async fn test_endpoint_routing_and_bearer_forwarding() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/auth/sessions/sid-1"))
        .and(header("authorization", "Bearer access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"revoked": true})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/auth/logout-all"))
        .and(header("authorization", "Bearer access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"revoked_count": 2})))
        .expect(1)
        .mount(&server)
        .await;

    let client = UpstreamClient::new(&test_config(&server.uri())).unwrap();

    let revoke = client.revoke_session("access-token", "sid-1").await.unwrap();
    assert_eq!(revoke.data, json!({"revoked": true}));

    let logout = client.logout_all("access-token").await.unwrap();
    assert_eq!(logout.data, json!({"revoked_count": 2}));

    server.verify().await;
}
