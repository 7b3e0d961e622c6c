//! Claims carried by identity tokens and stream tickets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Claims read from a bearer identity token.
///
/// Only the fields the relay needs are modelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject, the identity provider's user id.
    pub sub: String,
    /// Verified email address.
    #[serde(default)]
    pub email: Option<String>,
    /// Expiration timestamp (seconds since epoch).
    pub exp: i64,
}

/// Claims embedded in a stream ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketClaims {
    /// Subject the ticket was issued to.
    pub sub: String,
    /// Tenant the ticket grants access to.
    pub tid: String,
    /// Issued-at timestamp (seconds since epoch).
    pub iat: i64,
    /// Expiration timestamp (seconds since epoch).
    pub exp: i64,
    /// Ticket purpose.
    pub typ: TicketType,
}

/// Ticket purpose marker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TicketType {
    /// Opens one event stream.
    Stream,
}

impl TicketClaims {
    /// Returns the expiration as a `DateTime<Utc>`.
    pub fn expires_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.exp, 0).unwrap_or_else(Utc::now)
    }
}
