//! User repository: the tenant lookup backing stream authentication.

use async_trait::async_trait;
use sqlx::PgPool;

use relay_core::error::{AppError, ErrorKind};
use relay_core::result::AppResult;
use relay_core::traits::TenantResolver;

/// Read-only access to the `users` table.
#[derive(Debug, Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Find the tenant of a user by email (case-insensitive).
    ///
    /// Users with a blank `business_id` are treated as having no tenant.
    pub async fn find_business_id_by_email(&self, email: &str) -> AppResult<Option<String>> {
        let business_id: Option<Option<String>> = sqlx::query_scalar(
            "SELECT business_id FROM users WHERE LOWER(email) = LOWER($1) LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::with_source(ErrorKind::Database, "Failed to find user by email", e)
        })?;

        Ok(business_id
            .flatten()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty()))
    }
}

#[async_trait]
impl TenantResolver for UserRepository {
    async fn lookup_tenant_id_by_email(&self, email: &str) -> AppResult<Option<String>> {
        self.find_business_id_by_email(email).await
    }
}
