//! Integration tests for per-route admission control.

mod helpers;

use axum::http::StatusCode;
use relay_core::config::rate_limit::RateLimitRule;

use helpers::{TestApp, identity_token, test_config};

fn header(response: &axum::response::Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn limited_app(bucket: &str, max: u64) -> TestApp {
    let mut config = test_config();
    config.rate_limit.buckets.insert(
        bucket.to_string(),
        RateLimitRule {
            max,
            window_ms: 60_000,
        },
    );
    TestApp::with_config(config)
}

#[tokio::test]
async fn test_accepted_responses_carry_limit_headers() {
    let app = limited_app("api", 5);

    let response = app.send("/api/health", None, "198.51.100.1").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-limit"), "5");
    assert_eq!(header(&response, "x-ratelimit-remaining"), "4");
    assert!(header(&response, "x-ratelimit-reset").parse::<u64>().is_ok());
}

#[tokio::test]
async fn test_limit_exhaustion_returns_429() {
    let app = limited_app("api", 2);

    for remaining in ["1", "0"] {
        let response = app.send("/api/health", None, "198.51.100.2").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-remaining"), remaining);
    }

    let response = app.send("/api/health", None, "198.51.100.2").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-limit"), "2");
    assert_eq!(header(&response, "x-ratelimit-remaining"), "0");
    let retry_after: u64 = header(&response, "retry-after").parse().unwrap();
    assert!((1..=60).contains(&retry_after));

    let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "RATE_LIMITED");
    assert_eq!(body["message"], "Too Many Requests");
}

#[tokio::test]
async fn test_clients_are_counted_separately() {
    let app = limited_app("api", 1);

    let first = app.send("/api/health", None, "198.51.100.3").await;
    let second = app.send("/api/health", None, "198.51.100.3").await;
    let other = app.send("/api/health", None, "198.51.100.4").await;

    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(other.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_buckets_are_independent() {
    let app = limited_app("events", 1);
    let token = identity_token("alice@acme.test");

    let stream = app.send("/api/events/stream", Some(&token), "198.51.100.5").await;
    assert_eq!(stream.status(), StatusCode::OK);
    drop(stream);

    let refused = app.send("/api/events/stream", Some(&token), "198.51.100.5").await;
    assert_eq!(refused.status(), StatusCode::TOO_MANY_REQUESTS);

    let health = app.send("/api/health", None, "198.51.100.5").await;
    assert_eq!(health.status(), StatusCode::OK);
    let negotiate = app
        .send("/api/events/negotiate", Some(&token), "198.51.100.5")
        .await;
    assert_eq!(negotiate.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_rejected_stream_does_not_touch_lease() {
    let app = limited_app("events", 0);
    let token = identity_token("alice@acme.test");

    let response = app.send("/api/events/stream", Some(&token), "198.51.100.6").await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(app.hub.lease.start_count(), 0);
    assert_eq!(app.hub.connections.connection_count(), 0);
}
