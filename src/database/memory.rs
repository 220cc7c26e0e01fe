use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::database::models::{
    AuthorizationCode, DeliveryStatus, DeliveryTransition, OAuthClient, OAuthToken, RevokedCounts,
    TokenKind, WebhookDelivery, WebhookRegistration,
};
use crate::database::repository::{ClientStore, DeliveryStore, RegistrationStore, TokenStore};
use crate::errors::StoreError;

#[derive(Default)]
struct Tables {
    clients: HashMap<Uuid, OAuthClient>,
    codes: HashMap<Uuid, AuthorizationCode>,
    access_tokens: HashMap<Uuid, OAuthToken>,
    refresh_tokens: HashMap<Uuid, OAuthToken>,
    registrations: HashMap<Uuid, WebhookRegistration>,
    deliveries: HashMap<Uuid, WebhookDelivery>,
}

impl Tables {
    fn tokens(&mut self, kind: TokenKind) -> &mut HashMap<Uuid, OAuthToken> {
        match kind {
            TokenKind::Access => &mut self.access_tokens,
            TokenKind::Refresh => &mut self.refresh_tokens,
        }
    }
}

/// In-process store with the same conditional-write semantics as
/// [`PgStore`](crate::database::PgStore). Every mutating call that changes
/// a row bumps [`MemoryStore::write_count`].
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    writes: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    fn wrote(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    pub async fn delivery_count(&self) -> usize {
        self.tables.lock().await.deliveries.len()
    }

    pub async fn live_token_count(&self, kind: TokenKind, client: Uuid) -> usize {
        self.tables
            .lock()
            .await
            .tokens(kind)
            .values()
            .filter(|t| t.client_id == client && !t.revoked)
            .count()
    }
}

#[async_trait]
impl ClientStore for MemoryStore {
    async fn insert_client(&self, client: &OAuthClient) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.clients.values().any(|c| c.client_id == client.client_id) {
            return Err(StoreError::Corrupt(format!(
                "duplicate client_id '{}'",
                client.client_id
            )));
        }
        tables.clients.insert(client.id, client.clone());
        self.wrote();
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> Result<Option<OAuthClient>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .clients
            .values()
            .find(|c| c.client_id == client_id)
            .cloned())
    }

    async fn find_client_by_id(&self, id: Uuid) -> Result<Option<OAuthClient>, StoreError> {
        Ok(self.tables.lock().await.clients.get(&id).cloned())
    }

    async fn list_active_clients(&self) -> Result<Vec<OAuthClient>, StoreError> {
        let tables = self.tables.lock().await;
        let mut clients: Vec<OAuthClient> = tables
            .clients
            .values()
            .filter(|c| !c.revoked)
            .cloned()
            .collect();
        clients.sort_by_key(|c| c.created_at);
        Ok(clients)
    }

    async fn update_client(&self, client: &OAuthClient) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(stored) = tables.clients.get_mut(&client.id) {
            stored.name = client.name.clone();
            stored.redirect_uris = client.redirect_uris.clone();
            stored.grants = client.grants.clone();
            stored.scopes = client.scopes.clone();
            stored.updated_at = client.updated_at;
            self.wrote();
        }
        Ok(())
    }

    async fn mark_client_revoked(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.clients.get_mut(&id) {
            Some(client) if !client.revoked => {
                client.revoked = true;
                client.updated_at = at;
                self.wrote();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn insert_authorization_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .codes
            .insert(code.id, code.clone());
        self.wrote();
        Ok(())
    }

    async fn find_live_authorization_code(
        &self,
        code: &str,
    ) -> Result<Option<AuthorizationCode>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .codes
            .values()
            .find(|c| c.code == code && !c.revoked)
            .cloned())
    }

    async fn consume_authorization_code(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.codes.get_mut(&id) {
            Some(code) if !code.revoked => {
                code.revoked = true;
                self.wrote();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_token(&self, kind: TokenKind, token: &OAuthToken) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .tokens(kind)
            .insert(token.id, token.clone());
        self.wrote();
        Ok(())
    }

    async fn find_live_token(
        &self,
        kind: TokenKind,
        token: &str,
    ) -> Result<Option<OAuthToken>, StoreError> {
        let mut tables = self.tables.lock().await;
        Ok(tables
            .tokens(kind)
            .values()
            .find(|t| t.token == token && !t.revoked)
            .cloned())
    }

    async fn consume_token(&self, kind: TokenKind, id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.tokens(kind).get_mut(&id) {
            Some(token) if !token.revoked => {
                token.revoked = true;
                self.wrote();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_client_credentials(&self, client: Uuid) -> Result<RevokedCounts, StoreError> {
        let mut tables = self.tables.lock().await;
        let mut counts = RevokedCounts::default();

        for code in tables.codes.values_mut() {
            if code.client_id == client && !code.revoked {
                code.revoked = true;
                counts.authorization_codes += 1;
            }
        }
        for token in tables.access_tokens.values_mut() {
            if token.client_id == client && !token.revoked {
                token.revoked = true;
                counts.access_tokens += 1;
            }
        }
        for token in tables.refresh_tokens.values_mut() {
            if token.client_id == client && !token.revoked {
                token.revoked = true;
                counts.refresh_tokens += 1;
            }
        }

        if counts != RevokedCounts::default() {
            self.wrote();
        }
        Ok(counts)
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let start = tables.codes.len() + tables.access_tokens.len() + tables.refresh_tokens.len();

        tables.codes.retain(|_, c| c.expires_at >= before);
        tables.access_tokens.retain(|_, t| t.expires_at >= before);
        tables.refresh_tokens.retain(|_, t| t.expires_at >= before);

        let end = tables.codes.len() + tables.access_tokens.len() + tables.refresh_tokens.len();
        let deleted = (start - end) as u64;
        if deleted > 0 {
            self.wrote();
        }
        Ok(deleted)
    }
}

#[async_trait]
impl RegistrationStore for MemoryStore {
    async fn insert_registration(
        &self,
        registration: &WebhookRegistration,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let taken = tables.registrations.values().any(|r| {
            r.platform_id == registration.platform_id && r.shop_id == registration.shop_id
        });
        if taken {
            return Ok(false);
        }
        tables
            .registrations
            .insert(registration.id, registration.clone());
        self.wrote();
        Ok(true)
    }

    async fn find_registration(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Option<WebhookRegistration>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .values()
            .find(|r| r.platform_id == platform_id && r.shop_id == shop_id)
            .cloned())
    }

    async fn find_registration_by_id(
        &self,
        id: Uuid,
    ) -> Result<Option<WebhookRegistration>, StoreError> {
        Ok(self.tables.lock().await.registrations.get(&id).cloned())
    }

    async fn list_active_registrations(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Vec<WebhookRegistration>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .registrations
            .values()
            .filter(|r| r.platform_id == platform_id && r.shop_id == shop_id && r.is_active)
            .cloned()
            .collect())
    }

    async fn update_registration(
        &self,
        id: Uuid,
        url: &str,
        event_types: &[String],
        at: DateTime<Utc>,
    ) -> Result<Option<WebhookRegistration>, StoreError> {
        let mut tables = self.tables.lock().await;
        let updated = tables.registrations.get_mut(&id).map(|registration| {
            registration.url = url.to_string();
            registration.event_types = event_types.to_vec();
            registration.is_active = true;
            registration.updated_at = at;
            registration.clone()
        });
        if updated.is_some() {
            self.wrote();
        }
        Ok(updated)
    }

    async fn deactivate_registration(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.registrations.get_mut(&id) {
            Some(registration) if registration.is_active => {
                registration.is_active = false;
                registration.updated_at = at;
                self.wrote();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[async_trait]
impl DeliveryStore for MemoryStore {
    async fn insert_delivery(&self, delivery: &WebhookDelivery) -> Result<(), StoreError> {
        self.tables
            .lock()
            .await
            .deliveries
            .insert(delivery.id, delivery.clone());
        self.wrote();
        Ok(())
    }

    async fn find_delivery(&self, id: Uuid) -> Result<Option<WebhookDelivery>, StoreError> {
        Ok(self.tables.lock().await.deliveries.get(&id).cloned())
    }

    async fn find_due_retries(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<WebhookDelivery>, StoreError> {
        let tables = self.tables.lock().await;
        let mut due: Vec<WebhookDelivery> = tables
            .deliveries
            .values()
            .filter(|d| {
                d.status == DeliveryStatus::Retrying
                    && d.next_retry_at.map_or(false, |at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_retry_at);
        Ok(due)
    }

    async fn apply_transition(
        &self,
        id: Uuid,
        expected_attempts: i32,
        transition: &DeliveryTransition,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables.lock().await;
        let delivery = match tables.deliveries.get_mut(&id) {
            Some(delivery) if !delivery.status.is_terminal() => delivery,
            _ => return Ok(false),
        };

        match transition {
            DeliveryTransition::Delivered => {
                delivery.status = DeliveryStatus::Delivered;
                delivery.next_retry_at = None;
                delivery.last_error = None;
            }
            DeliveryTransition::Retrying {
                attempt_count,
                next_retry_at,
                last_error,
            } => {
                if delivery.attempt_count != expected_attempts {
                    return Ok(false);
                }
                delivery.status = DeliveryStatus::Retrying;
                delivery.attempt_count = *attempt_count;
                delivery.next_retry_at = Some(*next_retry_at);
                delivery.last_error = Some(last_error.clone());
            }
            DeliveryTransition::Failed {
                attempt_count,
                last_error,
            } => {
                if delivery.attempt_count != expected_attempts {
                    return Ok(false);
                }
                delivery.status = DeliveryStatus::Failed;
                delivery.attempt_count = *attempt_count;
                delivery.next_retry_at = None;
                delivery.last_error = Some(last_error.clone());
            }
        }
        delivery.updated_at = at;
        self.wrote();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::UserType;
    use chrono::Duration;

    fn delivery(now: DateTime<Utc>) -> WebhookDelivery {
        WebhookDelivery {
            id: Uuid::new_v4(),
            registration_id: Uuid::new_v4(),
            event_type: "order.placed".to_string(),
            payload: serde_json::json!({"order_id": "o1"}),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: 3,
            next_retry_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn consuming_a_token_succeeds_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let token = OAuthToken {
            id: Uuid::new_v4(),
            token: "r1".to_string(),
            client_id: Uuid::new_v4(),
            user_id: "u1".to_string(),
            user_type: UserType::Customer,
            scope: None,
            expires_at: now + Duration::hours(1),
            revoked: false,
        };
        store.insert_token(TokenKind::Refresh, &token).await.unwrap();

        assert!(store.consume_token(TokenKind::Refresh, token.id).await.unwrap());
        assert!(!store.consume_token(TokenKind::Refresh, token.id).await.unwrap());
        assert!(store
            .find_live_token(TokenKind::Refresh, "r1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn delivered_rows_ignore_late_failures() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let row = delivery(now);
        store.insert_delivery(&row).await.unwrap();

        assert!(store
            .apply_transition(row.id, 0, &DeliveryTransition::Delivered, now)
            .await
            .unwrap());

        let late = DeliveryTransition::Failed {
            attempt_count: 1,
            last_error: "HTTP 500: boom".to_string(),
        };
        assert!(!store.apply_transition(row.id, 0, &late, now).await.unwrap());

        let stored = store.find_delivery(row.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.attempt_count, 0);
    }

    #[tokio::test]
    async fn stale_attempt_count_loses_the_race() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let row = delivery(now);
        store.insert_delivery(&row).await.unwrap();

        let first = DeliveryTransition::Retrying {
            attempt_count: 1,
            next_retry_at: now + Duration::seconds(2),
            last_error: "timeout".to_string(),
        };
        assert!(store.apply_transition(row.id, 0, &first, now).await.unwrap());
        assert!(!store.apply_transition(row.id, 0, &first, now).await.unwrap());
    }

    #[tokio::test]
    async fn second_registration_for_same_shop_is_rejected() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let registration = WebhookRegistration {
            id: Uuid::new_v4(),
            platform_id: "default".to_string(),
            shop_id: "s1".to_string(),
            url: "https://hooks.example/a".to_string(),
            event_types: vec!["order.placed".to_string()],
            secret: "secret".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(store.insert_registration(&registration).await.unwrap());

        let duplicate = WebhookRegistration {
            id: Uuid::new_v4(),
            ..registration
        };
        assert!(!store.insert_registration(&duplicate).await.unwrap());
    }
}
