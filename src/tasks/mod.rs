pub mod runner;

use log::{info, warn};
pub use runner::TaskRunner;

use crate::database::TokenStore;
use crate::utilities::Clock;
use crate::webhook::DeliveryEngine;

/// Scheduled entry point for webhook retries. Quiet unless something ran.
pub async fn process_webhook_retries(engine: &DeliveryEngine) {
    match engine.process_retries().await {
        Ok(summary) if summary.processed > 0 => info!(
            "Processed {} webhook retries: {} succeeded, {} failed",
            summary.processed, summary.succeeded, summary.failed
        ),
        Ok(_) => {}
        Err(e) => warn!("Failed to process webhook retries: {}", e),
    }
}

pub async fn purge_expired_credentials(store: &dyn TokenStore, clock: &dyn Clock) {
    match store.purge_expired(clock.now()).await {
        Ok(0) => {}
        Ok(deleted) => info!("Deleted {} expired authorization codes and tokens.", deleted),
        Err(e) => warn!("Failed to delete expired credentials: {:?}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::{OAuthToken, TokenKind, UserType};
    use crate::database::MemoryStore;
    use crate::utilities::ManualClock;
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    #[tokio::test]
    async fn purge_removes_only_expired_rows() {
        let store = MemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let client = Uuid::new_v4();

        for (token, ttl) in [("old", -10), ("fresh", 3600)] {
            store
                .insert_token(
                    TokenKind::Access,
                    &OAuthToken {
                        id: Uuid::new_v4(),
                        token: token.to_string(),
                        client_id: client,
                        user_id: "u1".to_string(),
                        user_type: UserType::User,
                        scope: None,
                        expires_at: clock.now() + Duration::seconds(ttl),
                        revoked: false,
                    },
                )
                .await
                .unwrap();
        }

        purge_expired_credentials(&store, &clock).await;

        assert_eq!(store.live_token_count(TokenKind::Access, client).await, 1);
        assert!(store
            .find_live_token(TokenKind::Access, "fresh")
            .await
            .unwrap()
            .is_some());
    }
}
