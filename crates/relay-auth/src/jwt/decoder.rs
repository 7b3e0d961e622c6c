//! Bearer identity token verification.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::warn;

use relay_core::config::auth::IdentityConfig;
use relay_core::error::AppError;
use relay_core::result::AppResult;
use relay_core::traits::{IdentityVerifier, VerifiedIdentity};

use super::claims::IdentityClaims;
use super::map_jwt_error;

/// Verifies identity tokens signed with HS256 or RS256.
///
/// When no key is configured every token is rejected, so the relay still
/// starts but admits no stream connections.
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
}

impl std::fmt::Debug for JwtIdentityVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityVerifier")
            .field("configured", &self.decoding_key.is_some())
            .field("validation", &self.validation)
            .finish()
    }
}

impl JwtIdentityVerifier {
    /// Creates a verifier from identity configuration.
    pub fn new(config: &IdentityConfig) -> AppResult<Self> {
        let (algorithm, decoding_key) = match config.algorithm.to_ascii_uppercase().as_str() {
            "HS256" => {
                let key = (!config.secret.is_empty())
                    .then(|| DecodingKey::from_secret(config.secret.as_bytes()));
                (Algorithm::HS256, key)
            }
            "RS256" => {
                let key = if config.public_key_pem.trim().is_empty() {
                    None
                } else {
                    Some(
                        DecodingKey::from_rsa_pem(config.public_key_pem.as_bytes()).map_err(
                            |e| {
                                AppError::configuration(format!(
                                    "Invalid RS256 public key for identity tokens: {e}"
                                ))
                            },
                        )?,
                    )
                };
                (Algorithm::RS256, key)
            }
            other => {
                return Err(AppError::configuration(format!(
                    "Unsupported identity token algorithm: {other}"
                )));
            }
        };

        if decoding_key.is_none() {
            warn!("Identity verification key not configured; stream connections will be rejected");
        }

        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;
        validation.leeway = config.leeway_seconds;
        if let Some(issuer) = &config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        Ok(Self {
            decoding_key,
            validation,
        })
    }

    /// Decodes and validates an identity token.
    pub fn decode_identity_token(&self, token: &str) -> AppResult<IdentityClaims> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AppError::authentication("Identity verification is not configured"))?;

        let data = decode::<IdentityClaims>(token, key, &self.validation).map_err(map_jwt_error)?;
        Ok(data.claims)
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, token: &str) -> AppResult<VerifiedIdentity> {
        let claims = self.decode_identity_token(token)?;
        let email = claims
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .ok_or_else(|| AppError::authentication("Token carries no email"))?;

        Ok(VerifiedIdentity {
            email,
            subject: claims.sub,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use jsonwebtoken::{EncodingKey, Header, encode};
    use relay_core::error::ErrorKind;
    use serde_json::json;

    use super::*;

    const SECRET: &str = "identity-test-secret";

    fn config() -> IdentityConfig {
        IdentityConfig {
            secret: SECRET.to_string(),
            ..IdentityConfig::default()
        }
    }

    fn token(claims: serde_json::Value, secret: &str) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 600
    }

    #[tokio::test]
    async fn test_verifies_hs256_token() {
        let verifier = JwtIdentityVerifier::new(&config()).unwrap();
        let jwt = token(
            json!({"sub": "uid-1", "email": "Owner@Example.com", "exp": future_exp()}),
            SECRET,
        );

        let identity = verifier.verify(&jwt).await.unwrap();
        assert_eq!(identity.email, "Owner@Example.com");
        assert_eq!(identity.subject, "uid-1");
    }

    #[tokio::test]
    async fn test_rejects_wrong_signature() {
        let verifier = JwtIdentityVerifier::new(&config()).unwrap();
        let jwt = token(
            json!({"sub": "uid-1", "email": "a@example.com", "exp": future_exp()}),
            "some-other-secret",
        );

        let err = verifier.verify(&jwt).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[tokio::test]
    async fn test_rejects_expired_token() {
        let verifier = JwtIdentityVerifier::new(&config()).unwrap();
        let jwt = token(
            json!({"sub": "uid-1", "email": "a@example.com", "exp": Utc::now().timestamp() - 3600}),
            SECRET,
        );

        let err = verifier.verify(&jwt).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
        assert_eq!(err.message, "Token has expired");
    }

    #[tokio::test]
    async fn test_rejects_token_without_email() {
        let verifier = JwtIdentityVerifier::new(&config()).unwrap();
        let jwt = token(json!({"sub": "uid-1", "exp": future_exp()}), SECRET);

        let err = verifier.verify(&jwt).await.unwrap_err();
        assert_eq!(err.message, "Token carries no email");
    }

    #[tokio::test]
    async fn test_enforces_configured_audience() {
        let verifier = JwtIdentityVerifier::new(&IdentityConfig {
            audience: Some("portal".to_string()),
            ..config()
        })
        .unwrap();

        let wrong = token(
            json!({"sub": "u", "email": "a@example.com", "aud": "other", "exp": future_exp()}),
            SECRET,
        );
        assert!(verifier.verify(&wrong).await.is_err());

        let right = token(
            json!({"sub": "u", "email": "a@example.com", "aud": "portal", "exp": future_exp()}),
            SECRET,
        );
        assert!(verifier.verify(&right).await.is_ok());
    }

    #[tokio::test]
    async fn test_unconfigured_verifier_rejects_everything() {
        let verifier = JwtIdentityVerifier::new(&IdentityConfig::default()).unwrap();
        let jwt = token(
            json!({"sub": "uid-1", "email": "a@example.com", "exp": future_exp()}),
            SECRET,
        );

        let err = verifier.verify(&jwt).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Authentication);
    }

    #[test]
    fn test_unknown_algorithm_is_a_configuration_error() {
        let err = JwtIdentityVerifier::new(&IdentityConfig {
            algorithm: "none".to_string(),
            ..config()
        })
        .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Configuration);
    }
}
