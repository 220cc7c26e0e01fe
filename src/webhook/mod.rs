mod delivery;
mod registry;
pub mod sender;
pub mod signature;

use std::sync::Arc;

pub use delivery::{next_transition, DeliveryEngine, DeliveryResult, RetrySummary};
pub use registry::{Registered, WebhookRegistry};
pub use sender::{HttpSender, ReqwestSender};

use crate::auth::token::RandomSource;
use crate::configuration::WebhookSettings;
use crate::database::{DeliveryStore, RegistrationStore};
use crate::utilities::Clock;

/// Registration and delivery wired over one store.
pub struct WebhookService {
    pub registry: Arc<WebhookRegistry>,
    pub engine: Arc<DeliveryEngine>,
}

impl WebhookService {
    pub fn new<S>(
        store: Arc<S>,
        sender: Arc<dyn HttpSender>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        settings: WebhookSettings,
    ) -> Self
    where
        S: RegistrationStore + DeliveryStore + 'static,
    {
        let registrations: Arc<dyn RegistrationStore> = store.clone();
        let deliveries: Arc<dyn DeliveryStore> = store;

        let registry = Arc::new(WebhookRegistry::new(
            registrations.clone(),
            clock.clone(),
            random,
        ));

        let engine = Arc::new(DeliveryEngine::new(
            registry.clone(),
            registrations,
            deliveries,
            sender,
            clock,
            settings,
        ));

        Self { registry, engine }
    }
}
