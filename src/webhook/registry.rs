use std::sync::Arc;

use log::info;
use url::Url;
use uuid::Uuid;

use crate::auth::token::{generate_token, RandomSource, TOKEN_BYTES};
use crate::database::models::WebhookRegistration;
use crate::database::RegistrationStore;
use crate::errors::ApiError;
use crate::utilities::Clock;

/// Outcome of a create-or-update registration. Only a fresh registration
/// carries the signing secret.
#[derive(Debug)]
pub enum Registered {
    Created {
        registration: WebhookRegistration,
        secret: String,
    },
    Updated {
        registration: WebhookRegistration,
    },
}

impl Registered {
    pub fn registration(&self) -> &WebhookRegistration {
        match self {
            Registered::Created { registration, .. } => registration,
            Registered::Updated { registration } => registration,
        }
    }
}

pub struct WebhookRegistry {
    store: Arc<dyn RegistrationStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl WebhookRegistry {
    pub fn new(
        store: Arc<dyn RegistrationStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            store,
            clock,
            random,
        }
    }

    /// Creates the registration for `(platform_id, shop_id)` or, when one
    /// exists, replaces its url and event types and reactivates it. The
    /// secret minted at creation is kept across updates.
    pub async fn register_webhook(
        &self,
        platform_id: &str,
        shop_id: &str,
        url: &str,
        event_types: Vec<String>,
    ) -> Result<Registered, ApiError> {
        if shop_id.is_empty() {
            return Err(ApiError::InvalidRequest("shop_id is required".to_string()));
        }
        check_url(url)?;
        if event_types.is_empty() {
            return Err(ApiError::InvalidRequest(
                "At least one event type is required".to_string(),
            ));
        }

        if let Some(existing) = self.store.find_registration(platform_id, shop_id).await? {
            return self.update(existing.id, url, &event_types).await;
        }

        let now = self.clock.now();
        let registration = WebhookRegistration {
            id: Uuid::new_v4(),
            platform_id: platform_id.to_string(),
            shop_id: shop_id.to_string(),
            url: url.to_string(),
            event_types,
            secret: generate_token(self.random.as_ref(), TOKEN_BYTES),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        if self.store.insert_registration(&registration).await? {
            info!(
                "Registered webhook {} for {}/{}",
                registration.id, platform_id, shop_id
            );
            let secret = registration.secret.clone();
            return Ok(Registered::Created {
                registration,
                secret,
            });
        }

        // Lost a race with a concurrent first registration; update the winner.
        let existing = self
            .store
            .find_registration(platform_id, shop_id)
            .await?
            .ok_or_else(|| {
                ApiError::ServerError(format!(
                    "registration for {}/{} vanished after conflict",
                    platform_id, shop_id
                ))
            })?;

        self.update(existing.id, url, &registration.event_types).await
    }

    async fn update(
        &self,
        id: Uuid,
        url: &str,
        event_types: &[String],
    ) -> Result<Registered, ApiError> {
        let registration = self
            .store
            .update_registration(id, url, event_types, self.clock.now())
            .await?
            .ok_or_else(|| ApiError::NotFound("Webhook registration not found".to_string()))?;

        Ok(Registered::Updated { registration })
    }

    pub async fn find_registration(
        &self,
        platform_id: &str,
        shop_id: &str,
    ) -> Result<Option<WebhookRegistration>, ApiError> {
        Ok(self.store.find_registration(platform_id, shop_id).await?)
    }

    /// Active registrations for the shop that subscribe to `event_type`.
    pub async fn find_active_registrations(
        &self,
        platform_id: &str,
        shop_id: &str,
        event_type: &str,
    ) -> Result<Vec<WebhookRegistration>, ApiError> {
        Ok(self
            .store
            .list_active_registrations(platform_id, shop_id)
            .await?
            .into_iter()
            .filter(|registration| registration.subscribes_to(event_type))
            .collect())
    }

    pub async fn deactivate_webhook(&self, id: Uuid) -> Result<bool, ApiError> {
        let deactivated = self
            .store
            .deactivate_registration(id, self.clock.now())
            .await?;
        if deactivated {
            info!("Deactivated webhook {}", id);
        }

        Ok(deactivated)
    }
}

fn check_url(url: &str) -> Result<(), ApiError> {
    match Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => Err(ApiError::InvalidRequest("URL must be a valid URL".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::SeededRandom;
    use crate::database::MemoryStore;
    use crate::utilities::ManualClock;
    use chrono::Utc;

    fn registry() -> WebhookRegistry {
        WebhookRegistry::new(
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(SeededRandom::new(3)),
        )
    }

    #[tokio::test]
    async fn second_registration_updates_in_place() {
        let registry = registry();

        let created = registry
            .register_webhook(
                "default",
                "s1",
                "https://hooks.example/a",
                vec!["order.placed".into()],
            )
            .await
            .unwrap();
        let (id, secret) = match created {
            Registered::Created {
                registration,
                secret,
            } => (registration.id, secret),
            other => panic!("expected a new registration, got {:?}", other),
        };

        registry.deactivate_webhook(id).await.unwrap();

        let updated = registry
            .register_webhook(
                "default",
                "s1",
                "https://hooks.example/b",
                vec!["order.cancelled".into()],
            )
            .await
            .unwrap();
        let registration = match updated {
            Registered::Updated { registration } => registration,
            other => panic!("expected an update, got {:?}", other),
        };

        assert_eq!(registration.id, id);
        assert_eq!(registration.secret, secret);
        assert_eq!(registration.url, "https://hooks.example/b");
        assert!(registration.is_active);
    }

    #[tokio::test]
    async fn active_lookup_filters_on_event_and_state() {
        let registry = registry();
        let registered = registry
            .register_webhook(
                "default",
                "s1",
                "https://hooks.example/a",
                vec!["order.placed".into()],
            )
            .await
            .unwrap();
        let id = registered.registration().id;

        assert_eq!(
            registry
                .find_active_registrations("default", "s1", "order.placed")
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(registry
            .find_active_registrations("default", "s1", "order.updated")
            .await
            .unwrap()
            .is_empty());

        assert!(registry.deactivate_webhook(id).await.unwrap());
        assert!(registry
            .find_active_registrations("default", "s1", "order.placed")
            .await
            .unwrap()
            .is_empty());
        assert!(registry
            .find_registration("default", "s1")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn rejects_bad_input() {
        let registry = registry();
        assert!(matches!(
            registry
                .register_webhook("default", "s1", "ftp://x", vec!["order.placed".into()])
                .await,
            Err(ApiError::InvalidRequest(_))
        ));
        assert!(matches!(
            registry
                .register_webhook("default", "s1", "https://hooks.example", vec![])
                .await,
            Err(ApiError::InvalidRequest(_))
        ));
    }
}
