use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{
    AuthorizationCode, AuthorizationCodeRow, DeliveryStatus, DeliveryTransition, OAuthClient,
    OAuthClientRow, OAuthToken, OAuthTokenRow, RevokedCounts, TokenKind, WebhookDelivery,
    WebhookDeliveryRow, WebhookRegistration,
};
use crate::database::repository::{ClientStore, DeliveryStore, RegistrationStore, TokenStore};
use crate::errors::StoreError;

/// Postgres-backed implementation of every store trait.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const CLIENT_COLUMNS: &str = "id, client_id, client_secret, name, redirect_uris, grants, scopes, revoked, created_at, updated_at";
const CODE_COLUMNS: &str = "id, code, client_id, user_id, user_type, redirect_uri, scope, state, expires_at, revoked";
const TOKEN_COLUMNS: &str = "id, token, client_id, user_id, user_type, scope, expires_at, revoked";
const REGISTRATION_COLUMNS: &str = "id, platform_id, shop_id, url, event_types, secret, is_active, created_at, updated_at";
const DELIVERY_COLUMNS: &str = "id, registration_id, event_type, payload, status, attempt_count, max_attempts, next_retry_at, last_error, created_at, updated_at";

#[async_trait]
impl ClientStore for PgStore {
    async fn insert_client(&self, client: &OAuthClient) -> Result<(), StoreError> {
        let grants: Vec<String> = client.grants.iter().map(|g| g.as_str().to_string()).collect();

        sqlx::query(
            r#"
            INSERT INTO oauth_client (id, client_id, client_secret, name, redirect_uris, grants, scopes, revoked, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(client.id)
        .bind(&client.client_id)
        .bind(&client.client_secret_hash)
        .bind(&client.name)
        .bind(&client.redirect_uris)
        .bind(&grants)
        .bind(&client.scopes)
        .bind(client.revoked)
        .bind(client.created_at)
        .bind(client.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, StoreError> {
        let sql = format!(
            "SELECT {} FROM oauth_client WHERE client_id = $1 AND deleted_at IS NULL",
            CLIENT_COLUMNS
        );

        sqlx::query_as::<_, OAuthClientRow>(&sql)
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?
            .map(OAuthClient::try_from)
            .transpose()
    }

    async fn find_client_by_id(&self, id: Uuid) -> Result<Option<OAuthClient>, StoreError> {
        let sql = format!(
            "SELECT {} FROM oauth_client WHERE id = $1 AND deleted_at IS NULL",
            CLIENT_COLUMNS
        );

        sqlx::query_as::<_, OAuthClientRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(OAuthClient::try_from)
            .transpose()
    }

    async fn list_active_clients(&self) -> Result<Vec<OAuthClient>, StoreError> {
        let sql = format!(
            "SELECT {} FROM oauth_client WHERE revoked = false AND deleted_at IS NULL ORDER BY created_at",
            CLIENT_COLUMNS
        );

        sqlx::query_as::<_, OAuthClientRow>(&sql)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(OAuthClient::try_from)
            .collect()
    }

    async fn update_client(&self, client: &OAuthClient) -> Result<(), StoreError> {
        let grants: Vec<String> = client.grants.iter().map(|g| g.as_str().to_string()).collect();

        sqlx::query(
            r#"
            UPDATE oauth_client
            SET name = $2, redirect_uris = $3, grants = $4, scopes = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(client.id)
        .bind(&client.name)
        .bind(&client.redirect_uris)
        .bind(&grants)
        .bind(&client.scopes)
        .bind(client.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_client_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE oauth_client SET revoked = true, updated_at = $2 WHERE id = $1 AND revoked = false",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl TokenStore for PgStore {
    async fn insert_authorization_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO oauth_authorization_code (id, code, client_id, user_id, user_type, redirect_uri, scope, state, expires_at, revoked)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(code.id)
        .bind(&code.code)
        .bind(code.client_id)
        .bind(&code.user_id)
        .bind(code.user_type.as_str())
        .bind(&code.redirect_uri)
        .bind(&code.scope)
        .bind(&code.state)
        .bind(code.expires_at)
        .bind(code.revoked)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_live_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        let sql = format!(
            "SELECT {} FROM oauth_authorization_code WHERE code = $1 AND revoked = false AND deleted_at IS NULL",
            CODE_COLUMNS
        );

        sqlx::query_as::<_, AuthorizationCodeRow>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?
            .map(AuthorizationCode::try_from)
            .transpose()
    }

    async fn consume_authorization_code(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE oauth_authorization_code SET revoked = true, updated_at = now() WHERE id = $1 AND revoked = false",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn insert_token(&self, kind: TokenKind, token: &OAuthToken) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            kind.table(),
            TOKEN_COLUMNS
        );

        sqlx::query(&sql)
            .bind(token.id)
            .bind(&token.token)
            .bind(token.client_id)
            .bind(&token.user_id)
            .bind(token.user_type.as_str())
            .bind(&token.scope)
            .bind(token.expires_at)
            .bind(token.revoked)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_live_token(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Option<OAuthToken>, StoreError> {
        let sql = format!(
            "SELECT {} FROM {} WHERE token = $1 AND revoked = false AND deleted_at IS NULL",
            TOKEN_COLUMNS,
            kind.table()
        );

        sqlx::query_as::<_, OAuthTokenRow>(&sql)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?
            .map(OAuthToken::try_from)
            .transpose()
    }

    async fn consume_token(&self, kind: TokenKind, id: Uuid) -> Result<bool, StoreError> {
        let sql = format!(
            "UPDATE {} SET revoked = true, updated_at = now() WHERE id = $1 AND revoked = false",
            kind.table()
        );

        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;

        Ok(result.rows_affected() == 1)
    }

    async fn revoke_client_credentials(&self, client: Uuid) -> Result<RevokedCounts, StoreError> {
        let mut transaction = self.pool.begin().await?;

        let codes = sqlx::query(
            "UPDATE oauth_authorization_code SET revoked = true, updated_at = now() WHERE client_id = $1 AND revoked = false",
        )
        .bind(client)
        .execute(&mut transaction)
        .await?;

        let access = sqlx::query(
            "UPDATE oauth_access_token SET revoked = true, updated_at = now() WHERE client_id = $1 AND revoked = false",
        )
        .bind(client)
        .execute(&mut transaction)
        .await?;

        let refresh = sqlx::query(
            "UPDATE oauth_refresh_token SET revoked = true, updated_at = now() WHERE client_id = $1 AND revoked = false",
        )
        .bind(client)
        .execute(&mut transaction)
        .await?;

        transaction.commit().await?;

        Ok(RevokedCounts {
            authorization_codes: codes.rows_affected(),
            access_tokens: access.rows_affected(),
            refresh_tokens: refresh.rows_affected(),
        })
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut deleted = 0;

        for table in [
            "oauth_authorization_code",
            TokenKind::Access.table(),
            TokenKind::Refresh.table(),
        ] {
            let sql = format!("DELETE FROM {} WHERE expires_at < $1", table);
            deleted += sqlx::query(&sql)
                .bind(before)
                .execute(&self.pool)
                .await?
                .rows_affected();
        }

        Ok(deleted)
    }
}

#[async_trait]
impl RegistrationStore for PgStore {
    async fn insert_registration(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_registration (id, platform_id, shop_id, url, event_types, secret, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (platform_id, shop_id) WHERE deleted_at IS NULL DO NOTHING
            "#,
        )
        .bind(registration.id)
        .bind(&registration.platform_id)
        .bind(&registration.shop_id)
        .bind(&registration.url)
        .bind(&registration.event_types)
        .bind(&registration.secret)
        .bind(registration.is_active)
        .bind(registration.created_at)
        .bind(registration.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn find_registration(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Option<WebhookRegistration>, StoreError> {
        let sql = format!(
            "SELECT {} FROM webhook_registration WHERE platform_id = $1 AND shop_id = $2 AND deleted_at IS NULL",
            REGISTRATION_COLUMNS
        );

        Ok(sqlx::query_as::<_, WebhookRegistration>(&sql)
            .bind(platform_id)
            .bind(shop_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_registration_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookRegistration>, StoreError> {
        let sql = format!(
            "SELECT {} FROM webhook_registration WHERE id = $1 AND deleted_at IS NULL",
            REGISTRATION_COLUMNS
        );

        Ok(sqlx::query_as::<_, WebhookRegistration>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_active_registrations(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Vec<WebhookRegistration>, StoreError> {
        let sql = format!(
            "SELECT {} FROM webhook_registration WHERE platform_id = $1 AND shop_id = $2 AND is_active = true AND deleted_at IS NULL",
            REGISTRATION_COLUMNS
        );

        Ok(sqlx::query_as::<_, WebhookRegistration>(&sql)
            .bind(platform_id)
            .bind(shop_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn update_registration(
        &self,
        id: Uuid,
        url: &str,
        event_types: &[String],
        at: DateTime<Utc>,
    ) -> Result<Option<WebhookRegistration>, StoreError> {
        let sql = format!(
            r#"
            UPDATE webhook_registration
            SET url = $2, event_types = $3, is_active = true, updated_at = $4
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING {}
            "#,
            REGISTRATION_COLUMNS
        );

        Ok(sqlx::query_as::<_, WebhookRegistration>(&sql)
            .bind(id)
            .bind(url)
            .bind(event_types)
            .bind(at)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn deactivate_registration(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE webhook_registration SET is_active = false, updated_at = $2 WHERE id = $1 AND is_active = true",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl DeliveryStore for PgStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        let sql = format!(
            "INSERT INTO webhook_delivery ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            DELIVERY_COLUMNS
        );

        sqlx::query(&sql)
            .bind(delivery.id)
            .bind(delivery.registration_id)
            .bind(&delivery.event_type)
            .bind(&delivery.payload)
            .bind(delivery.status.as_str())
            .bind(delivery.attempt_count)
            .bind(delivery.max_attempts)
            .bind(delivery.next_retry_at)
            .bind(&delivery.last_error)
            .bind(delivery.created_at)
            .bind(delivery.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn find_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, StoreError> {
        let sql = format!(
            "SELECT {} FROM webhook_delivery WHERE id = $1 AND deleted_at IS NULL",
            DELIVERY_COLUMNS
        );

        sqlx::query_as::<_, WebhookDeliveryRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(WebhookDelivery::try_from)
            .transpose()
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let sql = format!(
            r#"
            SELECT {} FROM webhook_delivery
            WHERE status = $1 AND next_retry_at <= $2 AND deleted_at IS NULL
            ORDER BY next_retry_at
            "#,
            DELIVERY_COLUMNS
        );

        sqlx::query_as::<_, WebhookDeliveryRow>(&sql)
            .bind(DeliveryStatus::Retrying.as_str())
            .bind(now)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(WebhookDelivery::try_from)
            .collect()
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        expected_attempts: i32,
        transition: &DeliveryTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = match transition {
            DeliveryTransition::Delivered => {
                sqlx::query(
                    r#"
                    UPDATE webhook_delivery
                    SET status = 'delivered', last_error = NULL, next_retry_at = NULL, updated_at = $2
                    WHERE id = $1 AND status IN ('pending', 'retrying')
                    "#,
                )
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?
            }
            DeliveryTransition::Retrying {
                attempt_count,
                next_retry_at,
                last_error,
            } => {
                sqlx::query(
                    r#"
                    UPDATE webhook_delivery
                    SET status = 'retrying', attempt_count = $3, next_retry_at = $4, last_error = $5, updated_at = $2
                    WHERE id = $1 AND status IN ('pending', 'retrying') AND attempt_count = $6
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(attempt_count)
                .bind(next_retry_at)
                .bind(last_error)
                .bind(expected_attempts)
                .execute(&self.pool)
                .await?
            }
            DeliveryTransition::Failed {
                attempt_count,
                last_error,
            } => {
                sqlx::query(
                    r#"
                    UPDATE webhook_delivery
                    SET status = 'failed', attempt_count = $3, next_retry_at = NULL, last_error = $4, updated_at = $2
                    WHERE id = $1 AND status IN ('pending', 'retrying') AND attempt_count = $5
                    "#,
                )
                .bind(id)
                .bind(at)
                .bind(attempt_count)
                .bind(last_error)
                .bind(expected_attempts)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected() == 1)
    }
}
