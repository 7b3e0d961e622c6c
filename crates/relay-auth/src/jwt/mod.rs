//! JWT decoding for identity tokens and stream tickets.

pub mod claims;
pub mod decoder;
pub mod ticket;

pub use claims::{IdentityClaims, TicketClaims, TicketType};
pub use decoder::JwtIdentityVerifier;
pub use ticket::{IssuedTicket, StreamTicketIssuer};

use relay_core::error::AppError;

/// Map a jsonwebtoken failure to an authentication error.
pub(crate) fn map_jwt_error(e: jsonwebtoken::errors::Error) -> AppError {
    match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AppError::authentication("Token has expired")
        }
        jsonwebtoken::errors::ErrorKind::InvalidToken => {
            AppError::authentication("Invalid token format")
        }
        jsonwebtoken::errors::ErrorKind::InvalidSignature => {
            AppError::authentication("Invalid token signature")
        }
        jsonwebtoken::errors::ErrorKind::InvalidIssuer => {
            AppError::authentication("Invalid token issuer")
        }
        jsonwebtoken::errors::ErrorKind::InvalidAudience => {
            AppError::authentication("Invalid token audience")
        }
        _ => AppError::authentication(format!("Token validation failed: {e}")),
    }
}
