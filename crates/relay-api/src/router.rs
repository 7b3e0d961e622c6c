//! Route definitions for the relay HTTP API.
//!
//! All routes are mounted under `/api`. Each group counts against its own
//! rate-limit bucket; every route except the event stream is bounded by the
//! request timeout.

use std::time::Duration;

use axum::http::StatusCode;
use axum::{Router, middleware as axum_middleware, routing::get};
use tower_http::timeout::TimeoutLayer;

use crate::handlers;
use crate::middleware::rate_limit::{self, RateLimitPolicy, RateLimitState};
use crate::state::AppState;

/// Rate-limit bucket for health and other plain API routes.
pub const API_BUCKET: &str = "api";
/// Rate-limit bucket for stream ticket negotiation.
pub const NEGOTIATE_BUCKET: &str = "negotiate";
/// Rate-limit bucket for opening event streams.
pub const EVENTS_BUCKET: &str = "events";

/// Build the Axum router with all routes and per-route middleware.
pub fn build_router(state: AppState) -> Router {
    let timeout = Duration::from_secs(state.config.server.request_timeout_seconds.max(1));

    let bounded = Router::new()
        .merge(rate_limited(health_routes(), &state, API_BUCKET))
        .merge(rate_limited(negotiate_routes(), &state, NEGOTIATE_BUCKET))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            timeout,
        ));

    let api_routes = bounded.merge(rate_limited(stream_routes(), &state, EVENTS_BUCKET));

    Router::new().nest("/api", api_routes).with_state(state)
}

/// Liveness and detailed health
fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/detailed", get(handlers::health::health_detailed))
}

/// Stream ticket issuance
fn negotiate_routes() -> Router<AppState> {
    Router::new().route("/events/negotiate", get(handlers::events::negotiate))
}

/// Long-lived event stream
fn stream_routes() -> Router<AppState> {
    Router::new().route("/events/stream", get(handlers::events::stream))
}

fn rate_limited(routes: Router<AppState>, state: &AppState, bucket: &str) -> Router<AppState> {
    let limit = RateLimitState {
        limiter: state.rate_limiter.clone(),
        policy: RateLimitPolicy::from_config(bucket, &state.config.rate_limit),
    };
    routes.layer(axum_middleware::from_fn_with_state(limit, rate_limit::enforce))
}
