//! Short-lived stream tickets.
//!
//! `EventSource` clients cannot set request headers, so the negotiate
//! endpoint trades a bearer identity for a ticket the client passes as a
//! query parameter when opening the stream.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use relay_core::config::auth::TicketConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;

use super::claims::{TicketClaims, TicketType};
use super::map_jwt_error;

/// Tickets are meant to be used within seconds; longer settings are clamped.
const MAX_TICKET_TTL_SECONDS: u64 = 3600;

/// A freshly signed ticket.
#[derive(Debug, Clone)]
pub struct IssuedTicket {
    /// Encoded ticket.
    pub token: String,
    /// When the ticket stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies HS256 stream tickets.
#[derive(Clone)]
pub struct StreamTicketIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl std::fmt::Debug for StreamTicketIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTicketIssuer")
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl StreamTicketIssuer {
    /// Creates an issuer, or `None` when no ticket secret is configured.
    pub fn from_config(config: &TicketConfig) -> Option<Self> {
        if config.secret.is_empty() {
            return None;
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        Some(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            validation,
            ttl: Duration::seconds(config.ttl_seconds.min(MAX_TICKET_TTL_SECONDS) as i64),
        })
    }

    /// Issues a ticket for `subject` scoped to `tenant_id`.
    pub fn issue(&self, tenant_id: &str, subject: &str) -> AppResult<IssuedTicket> {
        let now = Utc::now();
        let expires_at = now + self.ttl;
        let claims = TicketClaims {
            sub: subject.to_string(),
            tid: tenant_id.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            typ: TicketType::Stream,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign stream ticket: {e}")))?;

        Ok(IssuedTicket { token, expires_at })
    }

    /// Verifies a ticket and returns its claims.
    pub fn verify(&self, ticket: &str) -> AppResult<TicketClaims> {
        let data = decode::<TicketClaims>(ticket, &self.decoding_key, &self.validation)
            .map_err(map_jwt_error)?;

        if data.claims.tid.trim().is_empty() {
            return Err(AppError::authentication("Ticket carries no tenant"));
        }
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use relay_core::error::ErrorKind;

    use super::*;

    fn issuer(secret: &str) -> StreamTicketIssuer {
        StreamTicketIssuer::from_config(&TicketConfig {
            secret: secret.to_string(),
            ttl_seconds: 60,
        })
        .unwrap()
    }

    #[test]
    fn test_empty_secret_disables_tickets() {
        assert!(StreamTicketIssuer::from_config(&TicketConfig::default()).is_none());
    }

    #[test]
    fn test_issued_ticket_verifies_with_tenant() {
        let issuer = issuer("ticket-secret");
        let issued = issuer.issue("tenant-a", "uid-1").unwrap();

        let claims = issuer.verify(&issued.token).unwrap();
        assert_eq!(claims.tid, "tenant-a");
        assert_eq!(claims.sub, "uid-1");
        assert_eq!(claims.typ, TicketType::Stream);
        assert_eq!(claims.expires_at().timestamp(), issued.expires_at.timestamp());
        assert!(issued.expires_at > Utc::now());
    }

    #[test]
    fn test_ticket_from_other_secret_is_rejected() {
        let issued = issuer("secret-one").issue("tenant-a", "uid-1").unwrap();
        let err = issuer("secret-two").verify(&issued.token).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_garbage_ticket_is_rejected() {
        let err = issuer("ticket-secret").verify("not-a-ticket").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }
}
