//! Identity collaborators used to admit stream connections.

use async_trait::async_trait;

use crate::result::AppResult;

/// The caller behind a verified bearer credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    /// Verified email address.
    pub email: String,
    /// Identity provider subject.
    pub subject: String,
}

/// Turns a bearer credential into an identity.
#[async_trait]
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Verify `token`, failing with an `Authentication` error if it is not valid.
    async fn verify(&self, token: &str) -> AppResult<VerifiedIdentity>;
}

/// Maps a verified email to its tenant.
#[async_trait]
pub trait TenantResolver: Send + Sync + 'static {
    /// The tenant id for `email`, or `None` if the user is unknown.
    async fn lookup_tenant_id_by_email(&self, email: &str) -> AppResult<Option<String>>;
}
