//! Stream authentication: bearer credential to tenant.

use std::sync::Arc;

use tracing::{debug, warn};

use relay_core::error::{AppError, ErrorKind};
use relay_core::traits::{IdentityVerifier, TenantResolver};

/// A caller admitted to open a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedStream {
    /// Tenant the stream is scoped to.
    pub tenant_id: String,
    /// Verified email.
    pub email: String,
    /// Identity provider subject.
    pub subject: String,
}

/// Authenticates stream and negotiate requests.
#[derive(Clone)]
pub struct StreamAuthenticator {
    verifier: Arc<dyn IdentityVerifier>,
    resolver: Arc<dyn TenantResolver>,
}

impl std::fmt::Debug for StreamAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAuthenticator").finish()
    }
}

impl StreamAuthenticator {
    /// Creates a new authenticator.
    pub fn new(verifier: Arc<dyn IdentityVerifier>, resolver: Arc<dyn TenantResolver>) -> Self {
        Self { verifier, resolver }
    }

    /// Authenticates an `Authorization` header value.
    ///
    /// Every failure, including a resolver outage, is reported as an
    /// authentication error so the caller gets a plain 401.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<AuthenticatedStream, AppError> {
        let token = authorization
            .and_then(bearer_token)
            .ok_or_else(|| AppError::authentication("Missing bearer credential"))?;

        let identity = self.verifier.verify(token).await.map_err(|e| {
            debug!(error = %e, "Stream credential rejected");
            if e.kind == ErrorKind::Authentication {
                e
            } else {
                AppError::authentication("Credential could not be verified")
            }
        })?;

        let tenant_id = self
            .resolver
            .lookup_tenant_id_by_email(&identity.email)
            .await
            .map_err(|e| {
                warn!(error = %e, "Tenant lookup failed");
                AppError::authentication("Tenant could not be resolved")
            })?
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::authentication("No tenant for this identity"))?;

        Ok(AuthenticatedStream {
            tenant_id,
            email: identity.email,
            subject: identity.subject,
        })
    }
}

/// Extract the token from `Bearer <token>`, matching the scheme case-insensitively.
pub fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, rest) = header.split_at_checked(6)?;
    if !scheme.eq_ignore_ascii_case("bearer") || !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let token = rest.trim();
    (!token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use relay_core::result::AppResult;
    use relay_core::traits::VerifiedIdentity;

    use super::*;

    struct StaticVerifier;

    #[async_trait]
    impl IdentityVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> AppResult<VerifiedIdentity> {
            match token {
                "good" | "orphan" | "broken-db" => Ok(VerifiedIdentity {
                    email: format!("{token}@example.com"),
                    subject: format!("uid-{token}"),
                }),
                "outage" => Err(AppError::internal("identity provider down")),
                _ => Err(AppError::authentication("Invalid token signature")),
            }
        }
    }

    struct StaticResolver;

    #[async_trait]
    impl TenantResolver for StaticResolver {
        async fn lookup_tenant_id_by_email(&self, email: &str) -> AppResult<Option<String>> {
            match email {
                "good@example.com" => Ok(Some("tenant-a".to_string())),
                "broken-db@example.com" => Err(AppError::database("connection refused")),
                _ => Ok(None),
            }
        }
    }

    fn authenticator() -> StreamAuthenticator {
        StreamAuthenticator::new(Arc::new(StaticVerifier), Arc::new(StaticResolver))
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer abc"), Some("abc"));
        assert_eq!(bearer_token("bearer   abc "), Some("abc"));
        assert_eq!(bearer_token("BEARER\tabc"), Some("abc"));
        assert_eq!(bearer_token("Bearerabc"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("Basic abc"), None);
        assert_eq!(bearer_token(""), None);
    }

    #[tokio::test]
    async fn test_valid_credential_resolves_tenant() {
        let stream = authenticator().authenticate(Some("Bearer good")).await.unwrap();
        assert_eq!(stream.tenant_id, "tenant-a");
        assert_eq!(stream.email, "good@example.com");
        assert_eq!(stream.subject, "uid-good");
    }

    #[tokio::test]
    async fn test_every_failure_is_an_authentication_error() {
        let auth = authenticator();
        for header in [
            None,
            Some("Basic good"),
            Some("Bearer forged"),
            Some("Bearer outage"),
            Some("Bearer orphan"),
            Some("Bearer broken-db"),
        ] {
            let err = auth.authenticate(header).await.unwrap_err();
            assert_eq!(err.kind, ErrorKind::Authentication, "header {header:?}");
        }
    }
}
