use std::sync::Arc;

use chrono::Duration;
use uuid::Uuid;

use super::ClientRegistry;
use crate::auth::token::{generate_token, RandomSource, TOKEN_BYTES};
use crate::database::models::{AuthorizationCode, UserType};
use crate::database::TokenStore;
use crate::errors::ApiError;
use crate::utilities::Clock;

/// Identity and binding data for a code issued after a successful login.
#[derive(Debug, Clone)]
pub struct NewAuthorizationCode {
    pub client_id: String,
    pub user_id: String,
    pub user_type: UserType,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
}

pub struct AuthorizationCodeIssuer {
    registry: Arc<ClientRegistry>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    ttl: Duration,
}

impl AuthorizationCodeIssuer {
    pub fn new(
        registry: Arc<ClientRegistry>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        ttl: Duration,
    ) -> Self {
        Self {
            registry,
            tokens,
            clock,
            random,
            ttl,
        }
    }

    /// Mints a single-use code bound to the client, redirect URI and user.
    pub async fn create_authorization_code(
        &self,
        request: NewAuthorizationCode,
    ) -> Result<String, ApiError> {
        let client = self
            .registry
            .validate_client_by_id(&request.client_id)
            .await?
            .ok_or_else(|| ApiError::InvalidClient("Invalid client".to_string()))?;

        if !ClientRegistry::validate_redirect_uri(&client, &request.redirect_uri) {
            return Err(ApiError::InvalidRequest("Invalid redirect URI".to_string()));
        }

        let code = generate_token(self.random.as_ref(), TOKEN_BYTES);

        self.tokens
            .insert_authorization_code(&AuthorizationCode {
                id: Uuid::new_v4(),
                code: code.clone(),
                client_id: client.id,
                user_id: request.user_id,
                user_type: request.user_type,
                redirect_uri: request.redirect_uri,
                scope: request.scope.filter(|s| !s.is_empty()),
                state: request.state.filter(|s| !s.is_empty()),
                expires_at: self.clock.now() + self.ttl,
                revoked: false,
            })
            .await?;

        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::SeededRandom;
    use crate::configuration::OAuthSettings;
    use crate::database::MemoryStore;
    use crate::oauth::OAuthServer;
    use crate::utilities::ManualClock;
    use chrono::Utc;

    const REDIRECT: &str = "https://platform.example/cb";

    async fn setup() -> (Arc<MemoryStore>, OAuthServer, String) {
        let store = Arc::new(MemoryStore::new());
        let server = OAuthServer::new(
            store.clone(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(SeededRandom::new(3)),
            &OAuthSettings::default(),
        );
        let (client, _) = server
            .clients
            .create_client("Acme", vec![REDIRECT.to_string()], None, None)
            .await
            .unwrap();

        (store, server, client.client_id)
    }

    fn request(client_id: &str, redirect_uri: &str) -> NewAuthorizationCode {
        NewAuthorizationCode {
            client_id: client_id.to_string(),
            user_id: "u1".to_string(),
            user_type: UserType::Customer,
            redirect_uri: redirect_uri.to_string(),
            scope: Some(String::new()),
            state: Some("abc".to_string()),
        }
    }

    #[tokio::test]
    async fn issued_code_is_bound_to_the_request() {
        let (store, server, client_id) = setup().await;

        let code = server
            .codes
            .create_authorization_code(request(&client_id, REDIRECT))
            .await
            .unwrap();
        assert_eq!(code.len(), 64);

        let stored = store
            .find_live_authorization_code(&code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.user_type, UserType::Customer);
        assert_eq!(stored.redirect_uri, REDIRECT);
        assert_eq!(stored.scope, None);
        assert_eq!(stored.state.as_deref(), Some("abc"));
        assert!(!stored.revoked);
    }

    #[tokio::test]
    async fn unknown_client_or_redirect_is_refused() {
        let (store, server, client_id) = setup().await;
        let writes = store.write_count();

        assert!(matches!(
            server
                .codes
                .create_authorization_code(request("client_nope", REDIRECT))
                .await,
            Err(ApiError::InvalidClient(_))
        ));
        assert!(matches!(
            server
                .codes
                .create_authorization_code(request(&client_id, "https://platform.example/other"))
                .await,
            Err(ApiError::InvalidRequest(_))
        ));
        assert_eq!(store.write_count(), writes);
    }
}
