use std::sync::Arc;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use futures::future::join_all;
use log::{debug, error, info, warn};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use super::sender::{HttpSender, OutboundRequest, SendError};
use super::signature::{sign, EVENT_HEADER, SIGNATURE_HEADER};
use super::WebhookRegistry;
use crate::configuration::WebhookSettings;
use crate::database::models::{DeliveryStatus, DeliveryTransition, WebhookDelivery};
use crate::database::{DeliveryStore, RegistrationStore};
use crate::errors::ApiError;
use crate::utilities::{truncate, Clock};

const INACTIVE_REGISTRATION: &str = "Registration not found or inactive";

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeliveryResult {
    pub delivery_id: Uuid,
    pub success: bool,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct RetrySummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

#[derive(Serialize)]
struct Envelope<'a> {
    event_type: &'a str,
    timestamp: String,
    data: &'a Value,
}

/// Backoff stops doubling past `2^20` seconds (about twelve days).
pub const MAX_BACKOFF_EXPONENT: i32 = 20;

/// The state a delivery moves to after a failed attempt.
///
/// The attempt counter is incremented first. Once it reaches
/// `max_attempts` the delivery is failed for good; otherwise it is
/// re-armed `2^attempts` seconds from `now`, with the exponent capped at
/// [`MAX_BACKOFF_EXPONENT`].
pub fn next_transition(
    attempt_count: i32,
    max_attempts: i32,
    error: String,
    now: DateTime<Utc>,
) -> DeliveryTransition {
    let attempts = attempt_count.saturating_add(1);

    if attempts >= max_attempts {
        return DeliveryTransition::Failed {
            attempt_count: attempts,
            last_error: error,
        };
    }

    let exponent = attempts.clamp(0, MAX_BACKOFF_EXPONENT) as u32;
    let delay = Duration::milliseconds(1000 * 2i64.pow(exponent));

    let next_retry_at = match now.checked_add_signed(delay) {
        Some(at) => at,
        None => {
            return DeliveryTransition::Failed {
                attempt_count: attempts,
                last_error: error,
            }
        }
    };

    DeliveryTransition::Retrying {
        attempt_count: attempts,
        next_retry_at,
        last_error: error,
    }
}

/// Creates delivery rows for events and drives them through signed HTTP
/// attempts. It has no timers of its own; retries only happen when
/// [`DeliveryEngine::process_retries`] is called.
pub struct DeliveryEngine {
    registry: Arc<WebhookRegistry>,
    registrations: Arc<dyn RegistrationStore>,
    deliveries: Arc<dyn DeliveryStore>,
    sender: Arc<dyn HttpSender>,
    clock: Arc<dyn Clock>,
    settings: WebhookSettings,
}

impl DeliveryEngine {
    pub fn new(
        registry: Arc<WebhookRegistry>,
        registrations: Arc<dyn RegistrationStore>,
        deliveries: Arc<dyn DeliveryStore>,
        sender: Arc<dyn HttpSender>,
        clock: Arc<dyn Clock>,
        settings: WebhookSettings,
    ) -> Self {
        Self {
            registry,
            registrations,
            deliveries,
            sender,
            clock,
            settings,
        }
    }

    /// One pending delivery per active registration subscribed to the event.
    pub async fn create_deliveries_for_event(
        &self,
        platform_id: &str,
        shop_id: &str,
        event_type: &str,
        payload: Value,
    ) -> Result<Vec<WebhookDelivery>, ApiError> {
        let registrations = self
            .registry
            .find_active_registrations(platform_id, shop_id, event_type)
            .await?;

        let mut created = Vec::with_capacity(registrations.len());
        for registration in registrations {
            let now = self.clock.now();
            let delivery = WebhookDelivery {
                id: Uuid::new_v4(),
                registration_id: registration.id,
                event_type: event_type.to_string(),
                payload: payload.clone(),
                status: DeliveryStatus::Pending,
                attempt_count: 0,
                max_attempts: self.settings.max_attempts,
                next_retry_at: None,
                last_error: None,
                created_at: now,
                updated_at: now,
            };

            self.deliveries.insert_delivery(&delivery).await?;
            debug!(
                "Created delivery {} for registration {}",
                delivery.id, registration.id
            );
            created.push(delivery);
        }

        Ok(created)
    }

    pub async fn execute_delivery(&self, delivery_id: Uuid) -> Result<DeliveryResult, ApiError> {
        let delivery = self
            .deliveries
            .find_delivery(delivery_id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Webhook delivery not found".to_string()))?;

        if delivery.status.is_terminal() {
            return Ok(DeliveryResult {
                delivery_id,
                success: delivery.status == DeliveryStatus::Delivered,
                status_code: None,
                error: delivery.last_error,
            });
        }

        let registration = match self
            .registrations
            .find_registration_by_id(delivery.registration_id)
            .await?
        {
            Some(registration) if registration.is_active => registration,
            _ => {
                warn!(
                    "Delivery {}: registration {} is missing or inactive",
                    delivery.id, delivery.registration_id
                );
                // Not an attempt, so the counter stays where it is.
                let transition = DeliveryTransition::Failed {
                    attempt_count: delivery.attempt_count,
                    last_error: INACTIVE_REGISTRATION.to_string(),
                };
                self.record(&delivery, &transition).await;

                return Ok(DeliveryResult {
                    delivery_id,
                    success: false,
                    status_code: None,
                    error: Some(INACTIVE_REGISTRATION.to_string()),
                });
            }
        };

        let body = serde_json::to_vec(&Envelope {
            event_type: &delivery.event_type,
            timestamp: self.clock.now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data: &delivery.payload,
        })
        .map_err(|e| ApiError::ServerError(format!("failed to serialize webhook: {}", e)))?;

        let request = OutboundRequest {
            url: registration.url.clone(),
            headers: vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                (SIGNATURE_HEADER.to_string(), sign(&registration.secret, &body)),
                (EVENT_HEADER.to_string(), delivery.event_type.clone()),
            ],
            body,
        };

        let timeout = self.settings.delivery_timeout();
        let outcome = match tokio::time::timeout(timeout, self.sender.post(request)).await {
            Ok(result) => result,
            Err(_) => Err(SendError::Timeout(timeout)),
        };

        let limit = self.settings.error_truncate_len;
        let (status_code, error) = match outcome {
            Ok(response) if response.is_success() => (Some(response.status), None),
            Ok(response) => (
                Some(response.status),
                Some(format!(
                    "HTTP {}: {}",
                    response.status,
                    truncate(&response.body, limit)
                )),
            ),
            Err(e) => (None, Some(truncate(&e.to_string(), limit))),
        };

        let transition = match &error {
            None => DeliveryTransition::Delivered,
            Some(message) => next_transition(
                delivery.attempt_count,
                delivery.max_attempts,
                message.clone(),
                self.clock.now(),
            ),
        };

        match &transition {
            DeliveryTransition::Delivered => {
                info!("Delivered {} to {}", delivery.event_type, registration.url)
            }
            DeliveryTransition::Retrying {
                attempt_count,
                next_retry_at,
                last_error,
            } => warn!(
                "Delivery {} attempt {} failed ({}), retrying at {}",
                delivery.id, attempt_count, last_error, next_retry_at
            ),
            DeliveryTransition::Failed {
                attempt_count,
                last_error,
            } => warn!(
                "Delivery {} failed after {} attempts: {}",
                delivery.id, attempt_count, last_error
            ),
        }

        self.record(&delivery, &transition).await;

        Ok(DeliveryResult {
            delivery_id,
            success: error.is_none(),
            status_code,
            error,
        })
    }

    /// Applies the transition. A rejected write means another worker already
    /// moved the row on; storage errors are logged so the attempt result still
    /// reaches the caller.
    async fn record(&self, delivery: &WebhookDelivery, transition: &DeliveryTransition) {
        match self
            .deliveries
            .apply_transition(
                delivery.id,
                delivery.attempt_count,
                transition,
                self.clock.now(),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(
                "Delivery {} was already advanced; dropped {:?} write",
                delivery.id,
                transition.status()
            ),
            Err(e) => error!("Failed to record outcome of delivery {}: {}", delivery.id, e),
        }
    }

    /// Creates and immediately attempts every delivery for one event.
    pub async fn trigger_webhook_event(
        &self,
        platform_id: &str,
        shop_id: &str,
        event_type: &str,
        data: Value,
    ) -> Result<Vec<DeliveryResult>, ApiError> {
        let deliveries = self
            .create_deliveries_for_event(platform_id, shop_id, event_type, data)
            .await?;

        let attempts = deliveries.iter().map(|d| self.execute_delivery(d.id));
        let results = join_all(attempts)
            .await
            .into_iter()
            .zip(deliveries.iter())
            .map(|(result, delivery)| {
                result.unwrap_or_else(|e| DeliveryResult {
                    delivery_id: delivery.id,
                    success: false,
                    status_code: None,
                    error: Some(e.to_string()),
                })
            })
            .collect();

        Ok(results)
    }

    /// Attempts every retrying delivery that is due. Safe to call when
    /// nothing is due and from several workers at once.
    pub async fn process_retries(&self) -> Result<RetrySummary, ApiError> {
        let due = self.deliveries.find_due_retries(self.clock.now()).await?;
        let mut summary = RetrySummary {
            processed: due.len(),
            ..RetrySummary::default()
        };

        for delivery in due {
            match self.execute_delivery(delivery.id).await {
                Ok(result) if result.success => summary.succeeded += 1,
                Ok(_) => summary.failed += 1,
                Err(e) => {
                    error!("Retry of delivery {} errored: {}", delivery.id, e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// Fire-and-forget dispatch for business workflows. Never fails the
    /// caller; problems are logged and left to the retry job.
    pub async fn publish(&self, platform_id: &str, shop_id: &str, event_type: &str, data: Value) {
        match self
            .trigger_webhook_event(platform_id, shop_id, event_type, data)
            .await
        {
            Ok(results) => {
                let failed = results.iter().filter(|r| !r.success).count();
                if failed > 0 {
                    warn!(
                        "{} of {} deliveries of {} for {}/{} failed",
                        failed,
                        results.len(),
                        event_type,
                        platform_id,
                        shop_id
                    );
                }
            }
            Err(e) => error!(
                "Failed to publish {} for {}/{}: {}",
                event_type, platform_id, shop_id, e
            ),
        }
    }

    pub async fn get_delivery(&self, id: Uuid) -> Result<WebhookDelivery, ApiError> {
        self.deliveries
            .find_delivery(id)
            .await?
            .ok_or_else(|| ApiError::NotFound("Webhook delivery not found".to_string()))
    }
}
