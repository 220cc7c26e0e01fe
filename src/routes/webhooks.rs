use actix_web::{delete, get, post, web, HttpResponse};
use log::info;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::middleware::BearerAuth,
    database::models::{WebhookRegistration, SUPPORTED_EVENT_TYPES},
    errors::ApiError,
    webhook::{Registered, WebhookRegistry},
};

#[derive(Debug, Deserialize)]
pub struct RegisterWebhookBody {
    pub url: String,
    pub event_types: Vec<String>,
    pub shop_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ShopQuery {
    pub shop_id: Option<String>,
}

pub(crate) fn check_event_type(event_type: &str) -> Result<(), ApiError> {
    if SUPPORTED_EVENT_TYPES.contains(&event_type) {
        Ok(())
    } else {
        Err(ApiError::InvalidRequest(format!(
            "Unsupported event type '{}'. Supported types: {}",
            event_type,
            SUPPORTED_EVENT_TYPES.join(", ")
        )))
    }
}

fn shop_id(query: ShopQuery) -> Result<String, ApiError> {
    query.shop_id.filter(|s| !s.is_empty()).ok_or_else(|| {
        ApiError::InvalidRequest("shop_id query parameter is required".to_string())
    })
}

async fn existing_registration(
    registry: &WebhookRegistry,
    platform: &str,
    shop_id: &str,
) -> Result<WebhookRegistration, ApiError> {
    registry
        .find_registration(platform, shop_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Webhook registration not found".to_string()))
}

#[post("/platform/{platform}/webhook")]
pub async fn register_webhook(
    auth: BearerAuth,
    path: web::Path<String>,
    body: web::Json<RegisterWebhookBody>,
    registry: web::Data<WebhookRegistry>,
) -> Result<HttpResponse, ApiError> {
    let platform = path.into_inner();
    let body = body.into_inner();

    for event_type in &body.event_types {
        check_event_type(event_type)?;
    }

    let registered = registry
        .register_webhook(&platform, &body.shop_id, &body.url, body.event_types)
        .await?;

    info!(
        "Webhook for {}/{} registered by user {}",
        platform,
        body.shop_id,
        auth.token.user_id
    );

    Ok(match registered {
        Registered::Created {
            registration,
            secret,
        } => HttpResponse::Created().json(json!({
            "webhook": registration,
            "secret": secret,
            "message": "Webhook registered successfully. Store the secret securely - it will not be shown again.",
        })),
        Registered::Updated { registration } => HttpResponse::Ok().json(json!({
            "webhook": registration,
            "message": "Webhook registration updated",
        })),
    })
}

#[get("/platform/{platform}/webhook")]
pub async fn get_webhook(
    _auth: BearerAuth,
    path: web::Path<String>,
    query: web::Query<ShopQuery>,
    registry: web::Data<WebhookRegistry>,
) -> Result<HttpResponse, ApiError> {
    let platform = path.into_inner();
    let shop_id = shop_id(query.into_inner())?;

    let registration = existing_registration(&registry, &platform, &shop_id).await?;

    Ok(HttpResponse::Ok().json(json!({ "webhook": registration })))
}

#[delete("/platform/{platform}/webhook")]
pub async fn deactivate_webhook(
    _auth: BearerAuth,
    path: web::Path<String>,
    query: web::Query<ShopQuery>,
    registry: web::Data<WebhookRegistry>,
) -> Result<HttpResponse, ApiError> {
    let platform = path.into_inner();
    let shop_id = shop_id(query.into_inner())?;

    let registration = existing_registration(&registry, &platform, &shop_id).await?;
    registry.deactivate_webhook(registration.id).await?;

    Ok(HttpResponse::Ok().json(json!({ "message": "Webhook deactivated successfully" })))
}

pub fn webhooks_config(cfg: &mut web::ServiceConfig) {
    cfg.service(register_webhook)
        .service(get_webhook)
        .service(deactivate_webhook);
}
