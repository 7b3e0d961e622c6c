//! Response DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use relay_realtime::server::HubStatus;

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "ok" when the process answers.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_seconds: u64,
}

/// Detailed health response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailedHealthResponse {
    /// "ok", or "degraded" when a dependency is down.
    pub status: String,
    /// Crate version.
    pub version: String,
    /// Seconds since startup.
    pub uptime_seconds: u64,
    /// "connected", "unavailable" or "not_configured".
    pub database: String,
    /// Relay hub state.
    pub relay: HubStatus,
}

/// Negotiate response: where and how to open the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    /// Stream URL with the ticket attached.
    pub url: String,
    /// Tenant the ticket is scoped to.
    pub tenant_id: String,
    /// Logical group name for the tenant.
    pub group: String,
    /// Short-lived stream ticket.
    pub ticket: String,
    /// Ticket expiry.
    pub expires_at: DateTime<Utc>,
}
