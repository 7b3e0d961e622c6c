//! # relay-auth
//!
//! Bearer identity token verification and short-lived stream tickets.

pub mod jwt;

pub use jwt::{IssuedTicket, JwtIdentityVerifier, StreamTicketIssuer, TicketClaims};
