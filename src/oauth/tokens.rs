use std::sync::Arc;

use chrono::Duration;
use log::{info, warn};
use uuid::Uuid;

use super::ClientRegistry;
use crate::auth::schemas::{TokenResponse, ValidatedToken};
use crate::auth::token::{generate_token, RandomSource, TOKEN_BYTES};
use crate::configuration::OAuthSettings;
use crate::database::models::{Grant, OAuthClient, OAuthToken, RevokedCounts, TokenKind, UserType};
use crate::database::{ClientStore, TokenStore};
use crate::errors::ApiError;
use crate::utilities::Clock;

#[derive(Debug, Clone)]
pub struct ExchangeCode {
    pub code: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
}

/// Exchanges codes, rotates refresh tokens and answers "who is this bearer".
pub struct TokenService {
    registry: Arc<ClientRegistry>,
    clients: Arc<dyn ClientStore>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenService {
    pub fn new(
        registry: Arc<ClientRegistry>,
        clients: Arc<dyn ClientStore>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        settings: &OAuthSettings,
    ) -> Self {
        Self {
            registry,
            clients,
            tokens,
            clock,
            random,
            access_ttl: Duration::seconds(settings.access_token_ttl_secs),
            refresh_ttl: Duration::seconds(settings.refresh_token_ttl_secs),
        }
    }

    pub async fn exchange_code_for_tokens(
        &self,
        request: ExchangeCode,
    ) -> Result<TokenResponse, ApiError> {
        let client = self
            .authenticate_client(&request.client_id, &request.client_secret, Grant::AuthorizationCode)
            .await?;

        let code = self
            .tokens
            .find_live_authorization_code(&request.code)
            .await?
            .ok_or_else(|| ApiError::InvalidGrant("Invalid authorization code".to_string()))?;

        if code.client_id != client.id {
            return Err(ApiError::InvalidGrant(
                "Authorization code does not belong to this client".to_string(),
            ));
        }

        if code.redirect_uri != request.redirect_uri {
            return Err(ApiError::InvalidGrant("Redirect URI mismatch".to_string()));
        }

        if code.expires_at < self.clock.now() {
            self.tokens.consume_authorization_code(code.id).await?;
            return Err(ApiError::InvalidGrant(
                "Authorization code has expired".to_string(),
            ));
        }

        // Only the caller whose revoke lands may mint; a concurrent
        // exchange of the same code loses here.
        if !self.tokens.consume_authorization_code(code.id).await? {
            return Err(ApiError::InvalidGrant(
                "Invalid authorization code".to_string(),
            ));
        }

        self.mint_pair(client.id, code.user_id, code.user_type, code.scope)
            .await
    }

    /// Rotates a refresh token. A caller-supplied scope replaces the stored
    /// one as-is; it is not checked against what the client was granted.
    pub async fn refresh_tokens(&self, request: RefreshRequest) -> Result<TokenResponse, ApiError> {
        let client = self
            .authenticate_client(&request.client_id, &request.client_secret, Grant::RefreshToken)
            .await?;

        let token = self
            .tokens
            .find_live_token(TokenKind::Refresh, &request.refresh_token)
            .await?
            .ok_or_else(|| ApiError::InvalidGrant("Invalid refresh token".to_string()))?;

        if token.client_id != client.id {
            return Err(ApiError::InvalidGrant(
                "Refresh token does not belong to this client".to_string(),
            ));
        }

        if token.expires_at < self.clock.now() {
            self.tokens.consume_token(TokenKind::Refresh, token.id).await?;
            return Err(ApiError::InvalidGrant("Refresh token has expired".to_string()));
        }

        if !self.tokens.consume_token(TokenKind::Refresh, token.id).await? {
            return Err(ApiError::InvalidGrant("Invalid refresh token".to_string()));
        }

        let scope = request.scope.filter(|s| !s.is_empty()).or(token.scope);

        self.mint_pair(client.id, token.user_id, token.user_type, scope)
            .await
    }

    /// `None` for unknown, revoked or expired tokens and for tokens whose
    /// client has been revoked since issue.
    pub async fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<Option<ValidatedToken>, ApiError> {
        let access = match self.tokens.find_live_token(TokenKind::Access, token).await? {
            Some(access) => access,
            None => return Ok(None),
        };

        if access.expires_at < self.clock.now() {
            return Ok(None);
        }

        let client = match self.clients.find_client_by_id(access.client_id).await? {
            Some(client) if !client.revoked => client,
            _ => return Ok(None),
        };

        Ok(Some(ValidatedToken {
            user_id: access.user_id,
            user_type: access.user_type,
            client_id: client.client_id,
            scope: access.scope,
        }))
    }

    pub async fn revoke_client_tokens(&self, client_id: &str) -> Result<RevokedCounts, ApiError> {
        let client = match self.clients.find_client(client_id).await? {
            Some(client) => client,
            None => return Ok(RevokedCounts::default()),
        };

        let counts = self.tokens.revoke_client_credentials(client.id).await?;
        info!(
            "Revoked credentials of client {}: {} codes, {} access tokens, {} refresh tokens",
            client.client_id, counts.authorization_codes, counts.access_tokens, counts.refresh_tokens
        );

        Ok(counts)
    }

    /// Returns whether a live access token was revoked.
    pub async fn revoke_access_token(&self, token: &str) -> Result<bool, ApiError> {
        match self.tokens.find_live_token(TokenKind::Access, token).await? {
            Some(access) => Ok(self.tokens.consume_token(TokenKind::Access, access.id).await?),
            None => Ok(false),
        }
    }

    async fn authenticate_client(
        &self,
        client_id: &str,
        client_secret: &str,
        grant: Grant,
    ) -> Result<OAuthClient, ApiError> {
        let client = self
            .registry
            .validate_client(client_id, client_secret)
            .await?
            .ok_or_else(|| {
                warn!("Rejected credentials for client {}", client_id);
                ApiError::InvalidClient("Invalid client credentials".to_string())
            })?;

        if !client.supports(grant) {
            return Err(ApiError::UnauthorizedClient(format!(
                "Client does not support {} grant",
                grant.as_str()
            )));
        }

        Ok(client)
    }

    async fn mint_pair(
        &self,
        client: Uuid,
        user_id: String,
        user_type: UserType,
        scope: Option<String>,
    ) -> Result<TokenResponse, ApiError> {
        let now = self.clock.now();

        let access = OAuthToken {
            id: Uuid::new_v4(),
            token: generate_token(self.random.as_ref(), TOKEN_BYTES),
            client_id: client,
            user_id: user_id.clone(),
            user_type,
            scope: scope.clone(),
            expires_at: now + self.access_ttl,
            revoked: false,
        };
        let refresh = OAuthToken {
            id: Uuid::new_v4(),
            token: generate_token(self.random.as_ref(), TOKEN_BYTES),
            expires_at: now + self.refresh_ttl,
            ..access.clone()
        };

        self.tokens.insert_token(TokenKind::Access, &access).await?;
        self.tokens.insert_token(TokenKind::Refresh, &refresh).await?;

        Ok(TokenResponse {
            access_token: access.token,
            refresh_token: refresh.token,
            token_type: "Bearer".to_string(),
            expires_in: self.access_ttl.num_seconds(),
            scope,
            user_id,
            user_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::SeededRandom;
    use crate::database::MemoryStore;
    use crate::oauth::{NewAuthorizationCode, OAuthServer};
    use crate::utilities::ManualClock;
    use chrono::Utc;

    const REDIRECT: &str = "https://a.example/cb";

    struct Fixture {
        store: Arc<MemoryStore>,
        server: OAuthServer,
        clock: Arc<ManualClock>,
        client_id: String,
        secret: String,
    }

    async fn fixture(grants: Option<Vec<Grant>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let server = OAuthServer::new(
            store.clone(),
            clock.clone(),
            Arc::new(SeededRandom::new(42)),
            &OAuthSettings::default(),
        );
        let (client, secret) = server
            .clients
            .create_client("Adapter", vec![REDIRECT.to_string()], grants, None)
            .await
            .unwrap();

        Fixture {
            store,
            server,
            clock,
            client_id: client.client_id,
            secret,
        }
    }

    async fn issue_code(fx: &Fixture) -> String {
        fx.server
            .codes
            .create_authorization_code(NewAuthorizationCode {
                client_id: fx.client_id.clone(),
                user_id: "u1".to_string(),
                user_type: UserType::Seller,
                redirect_uri: REDIRECT.to_string(),
                scope: Some("orders:read".to_string()),
                state: Some("xyz".to_string()),
            })
            .await
            .unwrap()
    }

    fn exchange(fx: &Fixture, code: &str, redirect: &str) -> ExchangeCode {
        ExchangeCode {
            code: code.to_string(),
            client_id: fx.client_id.clone(),
            client_secret: fx.secret.clone(),
            redirect_uri: redirect.to_string(),
        }
    }

    fn refresh(fx: &Fixture, token: &str) -> RefreshRequest {
        RefreshRequest {
            refresh_token: token.to_string(),
            client_id: fx.client_id.clone(),
            client_secret: fx.secret.clone(),
            scope: None,
        }
    }

    #[tokio::test]
    async fn code_exchange_returns_bound_identity() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;

        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        assert_eq!(tokens.token_type, "Bearer");
        assert_eq!(tokens.expires_in, 7200);
        assert_eq!(tokens.user_id, "u1");
        assert_eq!(tokens.user_type, UserType::Seller);
        assert_eq!(tokens.scope.as_deref(), Some("orders:read"));
        assert_eq!(tokens.access_token.len(), 64);
        assert_ne!(tokens.access_token, tokens.refresh_token);
    }

    #[tokio::test]
    async fn code_is_single_use() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;

        assert!(fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .is_ok());

        let second = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await;
        assert!(matches!(second, Err(ApiError::InvalidGrant(_))));
    }

    #[tokio::test]
    async fn concurrent_exchanges_mint_once() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;

        let (a, b) = tokio::join!(
            fx.server
                .tokens
                .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT)),
            fx.server
                .tokens
                .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT)),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
    }

    #[tokio::test]
    async fn redirect_mismatch_is_invalid_grant() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;

        let result = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, "https://b.example/cb"))
            .await;

        match result {
            Err(ApiError::InvalidGrant(message)) => assert_eq!(message, "Redirect URI mismatch"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn expired_code_is_rejected_and_burned() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        fx.clock.advance(Duration::seconds(601));

        let result = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await;
        match result {
            Err(ApiError::InvalidGrant(message)) => {
                assert_eq!(message, "Authorization code has expired")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(fx
            .store
            .find_live_authorization_code(&code)
            .await
            .unwrap()
            .is_none());
    }

    /// A second client on the same server, returned as request credentials.
    async fn other_client(fx: &Fixture) -> (String, String) {
        let (client, secret) = fx
            .server
            .clients
            .create_client("Intruder", vec![REDIRECT.to_string()], None, None)
            .await
            .unwrap();

        (client.client_id, secret)
    }

    #[tokio::test]
    async fn codes_and_refresh_tokens_are_bound_to_their_client() {
        let fx = fixture(None).await;
        let (other_id, other_secret) = other_client(&fx).await;
        let code = issue_code(&fx).await;

        let mut foreign = exchange(&fx, &code, REDIRECT);
        foreign.client_id = other_id.clone();
        foreign.client_secret = other_secret.clone();
        match fx.server.tokens.exchange_code_for_tokens(foreign).await {
            Err(ApiError::InvalidGrant(message)) => {
                assert_eq!(message, "Authorization code does not belong to this client")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        // the rightful owner can still use it
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        let mut foreign = refresh(&fx, &tokens.refresh_token);
        foreign.client_id = other_id;
        foreign.client_secret = other_secret;
        match fx.server.tokens.refresh_tokens(foreign).await {
            Err(ApiError::InvalidGrant(message)) => {
                assert_eq!(message, "Refresh token does not belong to this client")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(fx
            .server
            .tokens
            .refresh_tokens(refresh(&fx, &tokens.refresh_token))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn expired_refresh_token_is_rejected_and_revoked() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        fx.clock.advance(Duration::seconds(1_209_601));

        match fx
            .server
            .tokens
            .refresh_tokens(refresh(&fx, &tokens.refresh_token))
            .await
        {
            Err(ApiError::InvalidGrant(message)) => {
                assert_eq!(message, "Refresh token has expired")
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(fx
            .store
            .find_live_token(TokenKind::Refresh, &tokens.refresh_token)
            .await
            .unwrap()
            .is_none());

        match fx
            .server
            .tokens
            .refresh_tokens(refresh(&fx, &tokens.refresh_token))
            .await
        {
            Err(ApiError::InvalidGrant(message)) => assert_eq!(message, "Invalid refresh token"),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn concurrent_refreshes_mint_once() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();
        let client = fx
            .server
            .clients
            .validate_client_by_id(&fx.client_id)
            .await
            .unwrap()
            .unwrap();

        let (a, b) = tokio::join!(
            fx.server
                .tokens
                .refresh_tokens(refresh(&fx, &tokens.refresh_token)),
            fx.server
                .tokens
                .refresh_tokens(refresh(&fx, &tokens.refresh_token)),
        );

        assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
        assert!(matches!(
            if a.is_ok() { b } else { a },
            Err(ApiError::InvalidGrant(_))
        ));
        // one pair from the exchange, one from the winning refresh
        assert_eq!(
            fx.store.live_token_count(TokenKind::Refresh, client.id).await,
            1
        );
        assert_eq!(
            fx.store.live_token_count(TokenKind::Access, client.id).await,
            2
        );
    }

    #[tokio::test]
    async fn wrong_secret_is_invalid_client() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let mut request = exchange(&fx, &code, REDIRECT);
        request.client_secret = "nope".to_string();

        let result = fx.server.tokens.exchange_code_for_tokens(request).await;
        assert!(matches!(result, Err(ApiError::InvalidClient(_))));
    }

    #[tokio::test]
    async fn grant_must_be_provisioned() {
        let fx = fixture(Some(vec![Grant::AuthorizationCode])).await;
        let code = issue_code(&fx).await;
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        let result = fx
            .server
            .tokens
            .refresh_tokens(refresh(&fx, &tokens.refresh_token))
            .await;
        assert!(matches!(result, Err(ApiError::UnauthorizedClient(_))));
    }

    #[tokio::test]
    async fn refresh_rotates_the_token() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let first = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        let second = fx
            .server
            .tokens
            .refresh_tokens(refresh(&fx, &first.refresh_token))
            .await
            .unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.scope.as_deref(), Some("orders:read"));

        let replay = fx
            .server
            .tokens
            .refresh_tokens(refresh(&fx, &first.refresh_token))
            .await;
        assert!(matches!(replay, Err(ApiError::InvalidGrant(_))));

        let mut widened = refresh(&fx, &second.refresh_token);
        widened.scope = Some("orders:write".to_string());
        let third = fx.server.tokens.refresh_tokens(widened).await.unwrap();
        assert_eq!(third.scope.as_deref(), Some("orders:write"));
    }

    #[tokio::test]
    async fn validation_honours_expiry_and_client_revocation() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        let validated = fx
            .server
            .tokens
            .validate_access_token(&tokens.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(validated.client_id, fx.client_id);
        assert_eq!(validated.user_id, "u1");

        fx.clock.advance(Duration::seconds(7201));
        assert!(fx
            .server
            .tokens
            .validate_access_token(&tokens.access_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn revoking_the_client_invalidates_live_tokens() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        let client = fx
            .server
            .clients
            .validate_client_by_id(&fx.client_id)
            .await
            .unwrap()
            .unwrap();
        let counts = fx.server.clients.revoke_client(client.id).await.unwrap();
        assert_eq!(counts.access_tokens, 1);
        assert_eq!(counts.refresh_tokens, 1);

        assert!(fx
            .server
            .tokens
            .validate_access_token(&tokens.access_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn single_access_token_revocation() {
        let fx = fixture(None).await;
        let code = issue_code(&fx).await;
        let tokens = fx
            .server
            .tokens
            .exchange_code_for_tokens(exchange(&fx, &code, REDIRECT))
            .await
            .unwrap();

        assert!(fx
            .server
            .tokens
            .revoke_access_token(&tokens.access_token)
            .await
            .unwrap());
        assert!(!fx
            .server
            .tokens
            .revoke_access_token(&tokens.access_token)
            .await
            .unwrap());
        assert!(fx
            .server
            .tokens
            .validate_access_token(&tokens.access_token)
            .await
            .unwrap()
            .is_none());
    }
}
