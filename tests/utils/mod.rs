#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use actix_web::web;
use async_trait::async_trait;
use chrono::Utc;
use secrecy::Secret;

use marketlink::auth::identity::{AuthenticatedUser, IdentityProvider};
use marketlink::auth::middleware::AdminKey;
use marketlink::auth::token::SeededRandom;
use marketlink::configuration::{
    AdminSettings, ApplicationSettings, DatabaseSettings, OAuthSettings, Settings, TaskSettings,
    WebhookSettings,
};
use marketlink::database::models::UserType;
use marketlink::database::MemoryStore;
use marketlink::errors::ApiError;
use marketlink::oauth::{ExchangeCode, NewAuthorizationCode, OAuthServer};
use marketlink::utilities::ManualClock;
use marketlink::webhook::sender::{OutboundRequest, SendError, WebhookResponse};
use marketlink::webhook::{HttpSender, WebhookService};

pub const ADMIN_KEY: &str = "test-admin-key";
pub const REDIRECT_URI: &str = "https://platform.example/callback";
pub const SELLER_EMAIL: &str = "seller@example.com";
pub const SELLER_PASSWORD: &str = "correct horse";

/// Records outbound webhook posts and answers with a settable status.
pub struct RecordingSender {
    status: Mutex<u16>,
    sent: Mutex<Vec<OutboundRequest>>,
}

impl RecordingSender {
    pub fn new(status: u16) -> Self {
        Self {
            status: Mutex::new(status),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn set_status(&self, status: u16) {
        *self.status.lock().unwrap() = status;
    }

    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl HttpSender for RecordingSender {
    async fn post(&self, request: OutboundRequest) -> Result<WebhookResponse, SendError> {
        self.sent.lock().unwrap().push(request);
        let status = *self.status.lock().unwrap();
        Ok(WebhookResponse {
            status,
            body: if status < 300 { "ok".into() } else { "boom".into() },
        })
    }
}

/// One seller account with a fixed password.
pub struct StaticIdentity;

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
        user_type: UserType,
    ) -> Result<Option<AuthenticatedUser>, ApiError> {
        if email == SELLER_EMAIL && password == SELLER_PASSWORD && user_type == UserType::Seller {
            Ok(Some(AuthenticatedUser {
                user_id: "seller_01".to_string(),
                user_type,
            }))
        } else {
            Ok(None)
        }
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<RecordingSender>,
    pub oauth: web::Data<OAuthServer>,
    pub webhooks: WebhookService,
    pub settings: Settings,
}

pub fn settings() -> Settings {
    Settings {
        application: ApplicationSettings {
            port: 0,
            host: "127.0.0.1".to_string(),
            base_url: "http://localhost:8080".to_string(),
        },
        database: DatabaseSettings {
            url: Secret::new("postgres://unused".to_string()),
            max_connections: 1,
        },
        oauth: OAuthSettings::default(),
        webhook: WebhookSettings::default(),
        admin: AdminSettings {
            api_key: Secret::new(ADMIN_KEY.to_string()),
        },
        tasks: TaskSettings::default(),
    }
}

impl TestApp {
    pub fn new() -> Self {
        let settings = settings();
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let sender = Arc::new(RecordingSender::new(200));

        let oauth = web::Data::new(OAuthServer::new(
            store.clone(),
            clock.clone(),
            Arc::new(SeededRandom::new(7)),
            &settings.oauth,
        ));
        let webhooks = WebhookService::new(
            store.clone(),
            sender.clone(),
            clock.clone(),
            Arc::new(SeededRandom::new(11)),
            settings.webhook.clone(),
        );

        Self {
            store,
            clock,
            sender,
            oauth,
            webhooks,
            settings,
        }
    }

    /// Registers every route and the app data they extract.
    pub fn configure(&self) -> impl FnOnce(&mut web::ServiceConfig) {
        let oauth = self.oauth.clone();
        let registry = web::Data::from(self.webhooks.registry.clone());
        let engine = web::Data::from(self.webhooks.engine.clone());
        let identity: Arc<dyn IdentityProvider> = Arc::new(StaticIdentity);
        let identity: web::Data<dyn IdentityProvider> = web::Data::from(identity);
        let settings = web::Data::new(self.settings.clone());

        let mut tera = tera::Tera::default();
        tera.add_raw_template("login.html", include_str!("../../templates/login.html"))
            .unwrap();

        move |cfg: &mut web::ServiceConfig| {
            cfg.app_data(marketlink::routes::json_config())
                .app_data(web::Data::new(tera))
                .app_data(settings)
                .app_data(oauth)
                .app_data(registry)
                .app_data(engine)
                .app_data(identity)
                .app_data(web::Data::new(AdminKey(Secret::new(ADMIN_KEY.to_string()))));

            marketlink::routes::oauth_config(cfg);
            marketlink::routes::webhooks_config(cfg);
            marketlink::routes::admin_config(cfg);
        }
    }

    /// Creates a client and returns `(client_id, client_secret)`.
    pub async fn client(&self) -> (String, String) {
        let (client, secret) = self
            .oauth
            .clients
            .create_client("Test Platform", vec![REDIRECT_URI.to_string()], None, None)
            .await
            .unwrap();

        (client.client_id, secret)
    }

    /// Runs the code flow in-process and returns a live access token.
    pub async fn access_token(&self) -> String {
        let (client_id, client_secret) = self.client().await;

        let code = self
            .oauth
            .codes
            .create_authorization_code(NewAuthorizationCode {
                client_id: client_id.clone(),
                user_id: "seller_01".to_string(),
                user_type: UserType::Seller,
                redirect_uri: REDIRECT_URI.to_string(),
                scope: None,
                state: None,
            })
            .await
            .unwrap();

        self.oauth
            .tokens
            .exchange_code_for_tokens(ExchangeCode {
                code,
                client_id,
                client_secret,
                redirect_uri: REDIRECT_URI.to_string(),
            })
            .await
            .unwrap()
            .access_token
    }
}
