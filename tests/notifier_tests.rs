//! # Notifier Fan-out Tests
//!
//! Exercises the pod notification fan-out against live HTTP servers:
//!
//! - Auth header and body propagation
//! - Retry behavior on transient failures
//! - Per-pod failure aggregation
//! - The in-flight concurrency bound
//! - The global deadline returning a partial result

use bytes::Bytes;
use decofile_operator::notifier::{build_body, fan_out, PodTarget};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn target(name: &str, base: &str, token: Option<&str>) -> PodTarget {
    PodTarget {
        name: name.to_string(),
        url: format!("{base}/.decofile/reload"),
        token: token.map(String::from),
    }
}

fn body() -> Bytes {
    build_body("1722470400", r#"{"a":{"x":1}}"#).expect("body")
}

#[tokio::test]
async fn auth_token_and_payload_reach_the_pod() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/.decofile/reload"))
        .and(header("Authorization", "Token tok-123"))
        .and(header("Content-Type", "application/json"))
        .and(body_partial_json(serde_json::json!({
            "timestamp": "1722470400",
            "source": "operator",
            "decofile": { "a": { "x": 1 } }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let targets = vec![target("web-1", &server.uri(), Some("tok-123"))];
    let result = fan_out(&http, targets, body(), 10, Duration::from_secs(30)).await;

    assert_eq!(result.notified, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(result.failure_message(), None);
}

#[tokio::test]
async fn tokenless_pod_is_notified_without_auth_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let targets = vec![target("web-1", &server.uri(), None)];
    let result = fan_out(&http, targets, body(), 10, Duration::from_secs(30)).await;

    assert_eq!(result.notified, 1);
    let requests = server.received_requests().await.expect("requests");
    assert!(requests[0].headers.get("Authorization").is_none());
}

#[tokio::test]
async fn transient_failure_is_retried_to_success() {
    let server = MockServer::start().await;
    // First attempt fails, the retry lands
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let targets = vec![target("web-1", &server.uri(), None)];
    let result = fan_out(&http, targets, body(), 10, Duration::from_secs(30)).await;

    assert_eq!(result.notified, 1);
    assert_eq!(result.failed, 0);
}

#[tokio::test]
async fn exhausted_retries_aggregate_as_a_per_pod_failure() {
    let ok_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&ok_server)
        .await;

    let failing_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&failing_server)
        .await;

    let http = reqwest::Client::new();
    let targets = vec![
        target("web-1", &ok_server.uri(), None),
        target("web-2", &failing_server.uri(), None),
    ];
    let result = fan_out(&http, targets, body(), 10, Duration::from_secs(60)).await;

    assert_eq!(result.notified, 1);
    assert_eq!(result.failed, 1);
    let message = result.failure_message().expect("failure");
    assert!(message.contains("web-2"));
    assert!(message.contains("503"));
    assert!(!message.contains("web-1"));
}

#[tokio::test]
async fn in_flight_requests_never_exceed_the_bound() {
    // Tracks concurrent handler entries precisely, which a canned-response
    // mock cannot
    let in_flight = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));

    let app_in_flight = in_flight.clone();
    let app_max_seen = max_seen.clone();
    let app = axum::Router::new().route(
        "/.decofile/reload",
        axum::routing::post(move || {
            let in_flight = app_in_flight.clone();
            let max_seen = app_max_seen.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                axum::http::StatusCode::OK
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let base = format!("http://{addr}");
    let targets: Vec<PodTarget> = (0..30)
        .map(|i| target(&format!("web-{i}"), &base, None))
        .collect();

    let http = reqwest::Client::new();
    let result = fan_out(&http, targets, body(), 10, Duration::from_secs(60)).await;

    assert_eq!(result.notified, 30);
    assert!(
        max_seen.load(Ordering::SeqCst) <= 10,
        "observed {} concurrent requests",
        max_seen.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn deadline_cancels_stragglers_and_returns_partial_result() {
    let fast_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&fast_server)
        .await;

    let slow_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&slow_server)
        .await;

    let http = reqwest::Client::new();
    let targets = vec![
        target("web-fast", &fast_server.uri(), None),
        target("web-slow", &slow_server.uri(), None),
    ];

    let started = std::time::Instant::now();
    let result = fan_out(&http, targets, body(), 10, Duration::from_secs(2)).await;

    assert!(result.timed_out);
    assert_eq!(result.notified, 1);
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(result.failure_message().expect("failure").contains("deadline"));
}
