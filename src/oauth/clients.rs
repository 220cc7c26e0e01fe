use std::sync::Arc;

use log::info;
use url::Url;
use uuid::Uuid;

use crate::auth::token::{generate_client_id, generate_token, RandomSource, TOKEN_BYTES};
use crate::auth::utils::{hash_secret, verify_secret};
use crate::database::models::{ClientUpdate, Grant, OAuthClient, RevokedCounts};
use crate::database::{ClientStore, TokenStore};
use crate::errors::ApiError;
use crate::utilities::Clock;

/// Registration, lookup and credential checks for OAuth clients.
pub struct ClientRegistry {
    clients: Arc<dyn ClientStore>,
    tokens: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
}

impl ClientRegistry {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        tokens: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        Self {
            clients,
            tokens,
            clock,
            random,
        }
    }

    /// Registers a client and returns it along with the plaintext secret.
    /// The secret is only ever available from this call.
    pub async fn create_client(
        &self,
        name: &str,
        redirect_uris: Vec<String>,
        grants: Option<Vec<Grant>>,
        scopes: Option<Vec<String>>,
    ) -> Result<(OAuthClient, String), ApiError> {
        if name.trim().is_empty() {
            return Err(ApiError::InvalidRequest("name is required".to_string()));
        }
        check_redirect_uris(&redirect_uris)?;

        let grants = grants.unwrap_or_else(Grant::all);
        if grants.is_empty() {
            return Err(ApiError::InvalidRequest(
                "at least one grant is required".to_string(),
            ));
        }

        let plain_secret = generate_token(self.random.as_ref(), TOKEN_BYTES);
        let now = self.clock.now();

        let client = OAuthClient {
            id: Uuid::new_v4(),
            client_id: generate_client_id(self.random.as_ref()),
            client_secret_hash: hash_secret(&plain_secret)?,
            name: name.to_string(),
            redirect_uris,
            grants,
            scopes: scopes.unwrap_or_default(),
            revoked: false,
            created_at: now,
            updated_at: now,
        };

        self.clients.insert_client(&client).await?;
        info!("Registered OAuth client {} ({})", client.client_id, client.name);

        Ok((client, plain_secret))
    }

    /// Client with matching credentials, or `None` for an unknown, revoked
    /// or wrong-secret client.
    pub async fn validate_client(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<Option<OAuthClient>, ApiError> {
        let client = match self.validate_client_by_id(client_id).await? {
            Some(client) => client,
            None => return Ok(None),
        };

        if !verify_secret(client_secret, &client.client_secret_hash) {
            return Ok(None);
        }

        Ok(Some(client))
    }

    pub async fn validate_client_by_id(
        &self,
        client_id: &str,
    ) -> Result<Option<OAuthClient>, ApiError> {
        Ok(self
            .clients
            .find_client(client_id)
            .await?
            .filter(|client| !client.revoked))
    }

    /// Exact, byte-for-byte membership in the registered set.
    pub fn validate_redirect_uri(client: &OAuthClient, uri: &str) -> bool {
        client.redirect_uris.iter().any(|registered| registered == uri)
    }

    pub async fn list_clients(&self) -> Result<Vec<OAuthClient>, ApiError> {
        Ok(self.clients.list_active_clients().await?)
    }

    pub async fn get_client(&self, id: Uuid) -> Result<OAuthClient, ApiError> {
        self.clients
            .find_client_by_id(id)
            .await?
            .filter(|client| !client.revoked)
            .ok_or_else(|| ApiError::NotFound("OAuth client not found".to_string()))
    }

    pub async fn update_client(
        &self,
        id: Uuid,
        update: ClientUpdate,
    ) -> Result<OAuthClient, ApiError> {
        let mut client = self.get_client(id).await?;

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(ApiError::InvalidRequest("name is required".to_string()));
            }
            client.name = name;
        }
        if let Some(redirect_uris) = update.redirect_uris {
            check_redirect_uris(&redirect_uris)?;
            client.redirect_uris = redirect_uris;
        }
        if let Some(grants) = update.grants {
            if grants.is_empty() {
                return Err(ApiError::InvalidRequest(
                    "at least one grant is required".to_string(),
                ));
            }
            client.grants = grants;
        }
        if let Some(scopes) = update.scopes {
            client.scopes = scopes;
        }
        client.updated_at = self.clock.now();

        self.clients.update_client(&client).await?;

        Ok(client)
    }

    /// Logical delete. The client is marked revoked first so validation
    /// fails immediately, then every code and token it owns is revoked.
    pub async fn revoke_client(&self, id: Uuid) -> Result<RevokedCounts, ApiError> {
        let client = self
            .clients
            .find_client_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("OAuth client not found".to_string()))?;

        self.clients.mark_client_revoked(client.id, self.clock.now()).await?;
        let counts = self.tokens.revoke_client_credentials(client.id).await?;

        info!(
            "Revoked OAuth client {}: {} codes, {} access tokens, {} refresh tokens",
            client.client_id, counts.authorization_codes, counts.access_tokens, counts.refresh_tokens
        );

        Ok(counts)
    }
}

fn check_redirect_uris(uris: &[String]) -> Result<(), ApiError> {
    if uris.is_empty() {
        return Err(ApiError::InvalidRequest(
            "at least one redirect_uri is required".to_string(),
        ));
    }

    for uri in uris {
        if Url::parse(uri).is_err() {
            return Err(ApiError::InvalidRequest(format!(
                "redirect_uri '{}' is not a valid URL",
                uri
            )));
        }
    }

    Ok(())
}
