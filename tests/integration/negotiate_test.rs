//! Integration tests for stream ticket negotiation.

mod helpers;

use axum::http::StatusCode;
use helpers::{SseBlock, TestApp, identity_token, test_config};

#[tokio::test]
async fn test_negotiate_returns_ticketed_stream_url() {
    let app = TestApp::new();

    let response = app
        .request("/api/events/negotiate", Some(&identity_token("alice@acme.test")))
        .await;

    assert_eq!(response.status, StatusCode::OK);
    let body = &response.body;
    let ticket = body["ticket"].as_str().unwrap();
    assert!(!ticket.is_empty());
    assert_eq!(body["tenantId"], "acme");
    assert_eq!(body["group"], "business.acme");
    assert_eq!(
        body["url"].as_str().unwrap(),
        format!("/api/events/stream?ticket={ticket}")
    );
    assert!(body["expiresAt"].is_string());

    // Negotiating alone never opens the broker lease.
    assert_eq!(app.hub.lease.start_count(), 0);
}

#[tokio::test]
async fn test_ticket_opens_stream_for_its_tenant() {
    let app = TestApp::new();
    let negotiated = app
        .request("/api/events/negotiate", Some(&identity_token("alice@acme.test")))
        .await;
    let url = negotiated.body["url"].as_str().unwrap().to_string();

    let response = app.send(&url, None, "203.0.113.20").await;
    assert_eq!(response.status(), StatusCode::OK);
    let mut stream = helpers::SseReader::from_response(response);

    assert_eq!(
        stream.next_block().await,
        Some(SseBlock::Comment("connected".to_string()))
    );

    app.publish("globex", "invoice").await;
    app.publish("acme", "order").await;
    let event = stream.next_event().await;
    assert_eq!(event["tenantId"], "acme");
}

#[tokio::test]
async fn test_forged_ticket_is_rejected() {
    let app = TestApp::new();

    let response = app
        .request("/api/events/stream?ticket=forged.ticket.value", None)
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.hub.lease.start_count(), 0);
}

#[tokio::test]
async fn test_identity_token_is_not_a_ticket() {
    let app = TestApp::new();
    let token = identity_token("alice@acme.test");

    let response = app
        .request(&format!("/api/events/stream?ticket={token}"), None)
        .await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_authorization_header_wins_over_ticket() {
    let app = TestApp::new();
    let negotiated = app
        .request("/api/events/negotiate", Some(&identity_token("alice@acme.test")))
        .await;
    let url = negotiated.body["url"].as_str().unwrap().to_string();

    let response = app.request(&url, Some("not-a-jwt")).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_negotiate_requires_bearer() {
    let app = TestApp::new();

    let response = app.request("/api/events/negotiate", None).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_negotiate_unavailable_without_ticket_secret() {
    let mut config = test_config();
    config.auth.ticket.secret = String::new();
    let app = TestApp::with_config(config);

    let response = app
        .request("/api/events/negotiate", Some(&identity_token("alice@acme.test")))
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.body["error"], "SERVICE_UNAVAILABLE");

    let response = app
        .request("/api/events/stream?ticket=anything", None)
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}
