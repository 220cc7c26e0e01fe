use async_trait::async_trait;
use sqlx::PgPool;

use super::utils::verify_secret;
use crate::database::models::{Account, UserType};
use crate::errors::{ApiError, StoreError};

/// A user proven by the identity collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub user_type: UserType,
}

/// Verifies login credentials for the authorize form.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// `None` when the credentials do not match an account of `user_type`.
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        user_type: UserType,
    ) -> Result<Option<AuthenticatedUser>, ApiError>;
}

/// Checks argon2 password hashes stored in the `accounts` table.
pub struct PgIdentityProvider {
    pool: PgPool,
}

impl PgIdentityProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityProvider for PgIdentityProvider {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        user_type: UserType,
    ) -> Result<Option<AuthenticatedUser>, ApiError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, email, password_hash, user_type, user_id FROM accounts WHERE lower(email) = lower($1) AND user_type = $2",
        )
        .bind(email)
        .bind(user_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(account
            .filter(|account| verify_secret(password, &account.password_hash))
            .map(|account| AuthenticatedUser {
                user_id: account.user_id,
                user_type,
            }))
    }
}
