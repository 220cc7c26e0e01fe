mod clients;
mod codes;
mod tokens;

use std::sync::Arc;

use chrono::Duration;

pub use clients::ClientRegistry;
pub use codes::{AuthorizationCodeIssuer, NewAuthorizationCode};
pub use tokens::{ExchangeCode, RefreshRequest, TokenService};

use crate::auth::token::RandomSource;
use crate::configuration::OAuthSettings;
use crate::database::{ClientStore, TokenStore};
use crate::utilities::Clock;

/// The authorization server's three services wired over one store.
pub struct OAuthServer {
    pub clients: Arc<ClientRegistry>,
    pub codes: AuthorizationCodeIssuer,
    pub tokens: TokenService,
}

impl OAuthServer {
    pub fn new<S>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        settings: &OAuthSettings,
    ) -> Self
    where
        S: ClientStore + TokenStore + 'static,
    {
        let client_store: Arc<dyn ClientStore> = store.clone();
        let token_store: Arc<dyn TokenStore> = store;

        let clients = Arc::new(ClientRegistry::new(
            client_store.clone(),
            token_store.clone(),
            clock.clone(),
            random.clone(),
        ));

        let codes = AuthorizationCodeIssuer::new(
            clients.clone(),
            token_store.clone(),
            clock.clone(),
            random.clone(),
            Duration::seconds(settings.authorization_code_ttl_secs),
        );

        let tokens = TokenService::new(
            clients.clone(),
            client_store,
            token_store,
            clock,
            random,
            settings,
        );

        Self {
            clients,
            codes,
            tokens,
        }
    }
}
