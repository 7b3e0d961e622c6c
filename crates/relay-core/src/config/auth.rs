//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Credential verification settings for streaming and negotiate requests.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Identity token verification settings.
    #[serde(default)]
    pub identity: IdentityConfig,
    /// Stream ticket settings.
    #[serde(default)]
    pub ticket: TicketConfig,
}

/// How bearer identity tokens are verified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// Signing algorithm: `"HS256"` or `"RS256"`.
    #[serde(default = "default_algorithm")]
    pub algorithm: String,
    /// Shared secret for HS256.
    #[serde(default)]
    pub secret: String,
    /// PEM-encoded public key for RS256.
    #[serde(default)]
    pub public_key_pem: String,
    /// Expected `iss` claim, if any.
    #[serde(default)]
    pub issuer: Option<String>,
    /// Expected `aud` claim, if any.
    #[serde(default)]
    pub audience: Option<String>,
    /// Clock skew tolerance in seconds.
    #[serde(default = "default_leeway")]
    pub leeway_seconds: u64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            secret: String::new(),
            public_key_pem: String::new(),
            issuer: None,
            audience: None,
            leeway_seconds: default_leeway(),
        }
    }
}

/// Short-lived stream ticket settings.
///
/// An empty secret disables the negotiate endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    /// HMAC secret used to sign tickets.
    #[serde(default)]
    pub secret: String,
    /// Ticket lifetime in seconds.
    #[serde(default = "default_ticket_ttl")]
    pub ttl_seconds: u64,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            ttl_seconds: default_ticket_ttl(),
        }
    }
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_leeway() -> u64 {
    5
}

fn default_ticket_ttl() -> u64 {
    60
}
