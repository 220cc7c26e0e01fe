use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::StoreError;

/// Event types a subscriber may register for.
pub const SUPPORTED_EVENT_TYPES: &[&str] = &[
    "order.placed",
    "order.created",
    "order.updated",
    "order.cancelled",
    "order.completed",
    "order.fulfillment_created",
];

#[allow(non_snake_case)]
#[derive(Debug, Deserialize, sqlx::FromRow, Serialize, Clone)]
pub struct WebhookRegistration {
    pub id: Uuid,
    pub platform_id: String,
    pub shop_id: String,
    pub url: String,
    pub event_types: Vec<String>,
    #[serde(skip_serializing)]
    pub secret: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookRegistration {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.is_active && self.event_types.iter().any(|e| e == event_type)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Retrying,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Retrying => "retrying",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Failed)
    }
}

impl std::str::FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeliveryStatus::Pending),
            "retrying" => Ok(DeliveryStatus::Retrying),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status '{}'", other)),
        }
    }
}

#[derive(Debug, Serialize, Clone)]
pub struct WebhookDelivery {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: DeliveryStatus,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
pub struct WebhookDeliveryRow {
    pub id: Uuid,
    pub registration_id: Uuid,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<WebhookDeliveryRow> for WebhookDelivery {
    type Error = StoreError;

    fn try_from(row: WebhookDeliveryRow) -> Result<Self, Self::Error> {
        Ok(WebhookDelivery {
            id: row.id,
            registration_id: row.registration_id,
            event_type: row.event_type,
            payload: row.payload,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            next_retry_at: row.next_retry_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// The write a finished attempt asks the store to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryTransition {
    Delivered,
    Retrying {
        attempt_count: i32,
        next_retry_at: DateTime<Utc>,
        last_error: String,
    },
    Failed {
        attempt_count: i32,
        last_error: String,
    },
}

impl DeliveryTransition {
    pub fn status(&self) -> DeliveryStatus {
        match self {
            DeliveryTransition::Delivered => DeliveryStatus::Delivered,
            DeliveryTransition::Retrying { .. } => DeliveryStatus::Retrying,
            DeliveryTransition::Failed { .. } => DeliveryStatus::Failed,
        }
    }
}
