use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::models::{
    AuthorizationCode, DeliveryTransition, OAuthClient, OAuthToken, RevokedCounts, TokenKind,
    WebhookDelivery, WebhookRegistration,
};
use crate::errors::StoreError;

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn insert_client(&self, client: &OAuthClient) -> Result<(), StoreError>;

    /// Looks a client up by its public `client_id`, revoked or not.
    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, StoreError>;

    async fn find_client_by_id(&self, id: Uuid) -> Result<Option<OAuthClient>, StoreError>;

    async fn list_active_clients(&self) -> Result<Vec<OAuthClient>, StoreError>;

    async fn update_client(&self, client: &OAuthClient) -> Result<(), StoreError>;

    /// Returns false if the client was already revoked or does not exist.
    async fn mark_client_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert_authorization_code(&self, code: &AuthorizationCode) -> Result<(), StoreError>;

    async fn find_live_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StoreError>;

    /// Conditional revoke: succeeds for exactly one caller while the code is
    /// still unrevoked.
    async fn consume_authorization_code(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn insert_token(&self, kind: TokenKind, token: &OAuthToken) -> Result<(), StoreError>;

    async fn find_live_token(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Option<OAuthToken>, StoreError>;

    /// Conditional revoke with the same single-winner guarantee as
    /// [`TokenStore::consume_authorization_code`].
    async fn consume_token(&self, kind: TokenKind, id: Uuid) -> Result<bool, StoreError>;

    async fn revoke_client_credentials(&self, client: Uuid) -> Result<RevokedCounts, StoreError>;

    /// Deletes codes and tokens that expired before `before`.
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Returns false when a registration for the same platform and shop
    /// already exists; nothing is written in that case.
    async fn insert_registration(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<bool, StoreError>;

    async fn find_registration(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Option<WebhookRegistration>, StoreError>;

    async fn find_registration_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookRegistration>, StoreError>;

    async fn list_active_registrations(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Vec<WebhookRegistration>, StoreError>;

    /// Replaces url and event types and reactivates. The secret is untouched.
    async fn update_registration(
        &self,
        id: Uuid,
        url: &str,
        event_types: &[String],
        at: DateTime<Utc>,
    ) -> Result<Option<WebhookRegistration>, StoreError>;

    async fn deactivate_registration(&self, id: Uuid, at: DateTime<Utc>)
        -> Result<bool, StoreError>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError>;

    async fn find_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, StoreError>;

    /// `retrying` deliveries whose `next_retry_at` is at or before `now`.
    async fn find_due_retries(&self, now: DateTime<Utc>)
        -> Result<Vec<WebhookDelivery>, StoreError>;

    /// Applies `transition` only while the row is still `pending` or
    /// `retrying`. Failure transitions additionally require the stored
    /// attempt count to equal `expected_attempts`, so two racing attempts
    /// cannot both advance the counter. Returns whether the row changed.
    async fn apply_transition(
        &self,
        id: Uuid,
        expected_attempts: i32,
        transition: &DeliveryTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;
}
