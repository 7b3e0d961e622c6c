//! Application state shared across all handlers and middleware.

use std::sync::Arc;
use std::time::Instant;

use relay_auth::StreamTicketIssuer;
use relay_core::config::AppConfig;
use relay_database::DatabasePool;
use relay_realtime::{RelayHub, StreamAuthenticator};

use crate::middleware::rate_limit::RateLimiter;

/// Application state containing all shared dependencies.
///
/// Passed to every Axum handler via `State<AppState>`.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Relay hub: broker lease, fan-out and open streams
    pub hub: Arc<RelayHub>,
    /// Bearer credential → tenant authentication
    pub authenticator: Arc<StreamAuthenticator>,
    /// Stream ticket issuer; `None` disables negotiate
    pub ticket_issuer: Option<Arc<StreamTicketIssuer>>,
    /// Shared fixed-window rate limiter
    pub rate_limiter: Arc<RateLimiter>,
    /// PostgreSQL pool, when configured
    pub database: Option<Arc<DatabasePool>>,
    /// Process start, for uptime
    pub started_at: Instant,
}
