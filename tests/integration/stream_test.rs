//! Integration tests for the event stream endpoint.

mod helpers;

use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::http::StatusCode;
use helpers::{SseBlock, TestApp, eventually, identity_token};

#[tokio::test]
async fn test_stream_without_credential_is_rejected_before_lease() {
    let app = TestApp::new();

    let response = app.request("/api/events/stream", None).await;

    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(response.body["error"], "UNAUTHORIZED");
    assert_eq!(app.hub.lease.start_count(), 0);
    assert_eq!(app.broker.stats().connections_opened.load(Ordering::SeqCst), 0);
    assert_eq!(app.hub.connections.connection_count(), 0);
}

#[tokio::test]
async fn test_stream_with_bad_token_is_rejected() {
    let app = TestApp::new();

    let response = app
        .request("/api/events/stream", Some("not-a-jwt"))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = app
        .request("/api/events/stream", Some(&identity_token("stranger@nowhere.test")))
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert_eq!(app.hub.lease.start_count(), 0);
}

#[tokio::test]
async fn test_stream_opens_with_connected_comment() {
    let app = TestApp::new();
    let mut stream = app.open_stream(&identity_token("alice@acme.test")).await;

    assert_eq!(
        stream.next_block().await,
        Some(SseBlock::Comment("connected".to_string()))
    );
    assert!(app.hub.lease.is_running());
    assert_eq!(app.hub.lease.subscriber_count(), 1);
}

#[tokio::test]
async fn test_events_are_delivered_to_their_tenant_only() {
    let app = TestApp::new();
    let mut acme = app.open_stream(&identity_token("alice@acme.test")).await;
    let mut globex = app.open_stream(&identity_token("carol@globex.test")).await;
    assert_eq!(app.hub.lease.start_count(), 1);

    app.publish("globex", "invoice").await;
    app.publish("acme", "order").await;

    let event = acme.next_event().await;
    assert_eq!(event["tenantId"], "acme");
    assert_eq!(event["entity"], "order");
    assert_eq!(event["entityId"], "order-1");
    assert_eq!(event["payload"]["total"], 42);

    let event = globex.next_event().await;
    assert_eq!(event["tenantId"], "globex");
    assert_eq!(event["entity"], "invoice");

    assert!(acme.is_quiet_for(Duration::from_millis(100)).await);
}

#[tokio::test]
async fn test_malformed_message_is_skipped() {
    let app = TestApp::new();
    let mut stream = app.open_stream(&identity_token("alice@acme.test")).await;

    app.broker.publish("{not json").await;
    app.broker.publish(r#"{"entity":"order","op":"created"}"#).await;
    app.publish("acme", "order").await;

    let event = stream.next_event().await;
    assert_eq!(event["entity"], "order");
    eventually(|| app.broker.acknowledged() == 3).await;
}

#[tokio::test]
async fn test_dropped_client_releases_only_its_subscription() {
    let app = TestApp::new();
    let token = identity_token("alice@acme.test");
    let first = app.open_stream(&token).await;
    let mut second = app.open_stream(&identity_token("bob@acme.test")).await;
    assert_eq!(app.hub.lease.subscriber_count(), 2);

    drop(first);

    eventually(|| app.hub.connections.connection_count() == 1).await;
    assert_eq!(app.hub.lease.subscriber_count(), 1);
    assert!(app.hub.lease.is_running());
    assert_eq!(app.hub.lease.stop_count(), 0);

    app.publish("acme", "order").await;
    assert_eq!(second.next_event().await["tenantId"], "acme");
}

#[tokio::test]
async fn test_last_client_leaving_stops_the_lease() {
    let app = TestApp::new();
    let stream = app.open_stream(&identity_token("alice@acme.test")).await;
    assert!(app.hub.lease.is_running());

    drop(stream);

    eventually(|| !app.hub.lease.is_running()).await;
    assert_eq!(app.hub.lease.stop_count(), 1);
    eventually(|| app.broker.open_connections() == 0).await;
    assert!(app.broker.subscription_names().is_empty());
}

#[tokio::test]
async fn test_shutdown_ends_open_streams() {
    let app = TestApp::new();
    let mut stream = app.open_stream(&identity_token("alice@acme.test")).await;
    assert_eq!(
        stream.next_block().await,
        Some(SseBlock::Comment("connected".to_string()))
    );

    app.hub.shutdown().await;

    while let Some(block) = stream.next_block().await {
        assert!(matches!(block, SseBlock::Comment(_)), "unexpected {block:?}");
    }
    assert!(!app.hub.lease.is_running());

    let response = app
        .request("/api/events/stream", Some(&identity_token("alice@acme.test")))
        .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_health_reports_relay_state() {
    let app = TestApp::new();
    let _stream = app.open_stream(&identity_token("alice@acme.test")).await;

    let response = app.request("/api/health/detailed", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["database"], "not_configured");
    assert_eq!(response.body["relay"]["connections"], 1);
    assert_eq!(response.body["relay"]["tenants"], 1);
}
