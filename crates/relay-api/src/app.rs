//! Application builder: wires router, middleware and state into an Axum app,
//! and runs the relay server.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::middleware as axum_middleware;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use relay_auth::{JwtIdentityVerifier, StreamTicketIssuer};
use relay_core::config::AppConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_database::{DatabasePool, UserRepository};
use relay_realtime::broker::connector_from_config;
use relay_realtime::{RelayHub, StreamAuthenticator};

use crate::middleware::cors::build_cors_layer;
use crate::middleware::logging::request_logging;
use crate::middleware::rate_limit::RateLimiter;
use crate::router::build_router;
use crate::state::AppState;

/// Builds the complete Axum application with all routes and middleware.
pub fn build_app(state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.server.cors);
    build_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(axum_middleware::from_fn(request_logging))
}

/// Runs the relay server until a shutdown signal arrives.
pub async fn run_server(config: AppConfig) -> AppResult<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting portal relay");

    // ── Database ─────────────────────────────────────────────────
    let database = Arc::new(DatabasePool::connect_lazy(&config.database)?);
    let tenants = Arc::new(UserRepository::new(database.pool().clone()));

    // ── Auth ─────────────────────────────────────────────────────
    let verifier = Arc::new(JwtIdentityVerifier::new(&config.auth.identity)?);
    let authenticator = Arc::new(StreamAuthenticator::new(verifier, tenants));
    let ticket_issuer = StreamTicketIssuer::from_config(&config.auth.ticket).map(Arc::new);
    if ticket_issuer.is_none() {
        warn!("No stream ticket secret configured; negotiate will answer 503");
    }

    // ── Relay ────────────────────────────────────────────────────
    let connector = connector_from_config(&config.broker)?;
    let hub = Arc::new(RelayHub::new(
        config.broker.clone(),
        config.realtime.clone(),
        connector,
    ));

    // ── HTTP ─────────────────────────────────────────────────────
    let state = AppState {
        config: Arc::new(config.clone()),
        hub: hub.clone(),
        authenticator,
        ticket_issuer,
        rate_limiter: Arc::new(RateLimiter::from_config(&config.rate_limit)),
        database: Some(database.clone()),
        started_at: Instant::now(),
    };

    let app = build_app(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AppError::internal(format!("Failed to bind {addr}: {e}")))?;

    info!(addr = %addr, "Portal relay listening");

    // ── Graceful shutdown ────────────────────────────────────────
    // Open streams never finish on their own, so the hub is shut down as
    // soon as the signal arrives; that ends every stream body.
    let (signalled_tx, mut signalled_rx) = watch::channel(false);
    let shutdown_hub = hub.clone();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, closing event streams");
            let _ = signalled_tx.send(true);
            shutdown_hub.shutdown().await;
        })
        .into_future();

    let grace = Duration::from_secs(config.server.shutdown_grace_seconds);
    let grace_elapsed = async move {
        if signalled_rx.wait_for(|signalled| *signalled).await.is_err() {
            std::future::pending::<()>().await;
        }
        tokio::time::sleep(grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|e| AppError::internal(format!("Server error: {e}")))?;
        }
        _ = grace_elapsed => {
            warn!(grace_seconds = grace.as_secs(), "Shutdown grace period elapsed; forcing exit");
        }
    }

    hub.shutdown().await;
    database.close().await;

    info!("Portal relay shut down gracefully");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
