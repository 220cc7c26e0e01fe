use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::webhooks::check_event_type;
use crate::{
    auth::{
        middleware::AdminGuard,
        schemas::{CreateClientRequest, CreatedClient},
    },
    database::models::ClientUpdate,
    errors::ApiError,
    oauth::OAuthServer,
    webhook::DeliveryEngine,
};

#[get("/admin/oauth-clients")]
pub async fn list_clients(
    _admin: AdminGuard,
    server: web::Data<OAuthServer>,
) -> Result<HttpResponse, ApiError> {
    let clients = server.clients.list_clients().await?;

    Ok(HttpResponse::Ok().json(json!({
        "count": clients.len(),
        "oauth_clients": clients,
    })))
}

#[post("/admin/oauth-clients")]
pub async fn create_client(
    _admin: AdminGuard,
    server: web::Data<OAuthServer>,
    body: web::Json<CreateClientRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();

    let (client, client_secret) = server
        .clients
        .create_client(&body.name, body.redirect_uris, body.grants, body.scopes)
        .await?;

    let created = CreatedClient {
        id: client.id,
        client_id: client.client_id,
        client_secret,
        name: client.name,
        redirect_uris: client.redirect_uris,
        grants: client.grants,
        scopes: client.scopes,
    };

    Ok(HttpResponse::Created().json(json!({
        "oauth_client": created,
        "message": "OAuth client created. Store the client_secret securely - it will not be shown again.",
    })))
}

#[get("/admin/oauth-clients/{id}")]
pub async fn get_client(
    _admin: AdminGuard,
    server: web::Data<OAuthServer>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let client = server.clients.get_client(path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(json!({ "oauth_client": client })))
}

#[put("/admin/oauth-clients/{id}")]
pub async fn update_client(
    _admin: AdminGuard,
    server: web::Data<OAuthServer>,
    path: web::Path<Uuid>,
    body: web::Json<ClientUpdate>,
) -> Result<HttpResponse, ApiError> {
    let client = server
        .clients
        .update_client(path.into_inner(), body.into_inner())
        .await?;

    Ok(HttpResponse::Ok().json(json!({ "oauth_client": client })))
}

#[delete("/admin/oauth-clients/{id}")]
pub async fn revoke_client(
    _admin: AdminGuard,
    server: web::Data<OAuthServer>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let revoked = server.clients.revoke_client(id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "id": id,
        "object": "oauth_client",
        "deleted": true,
        "revoked": revoked,
    })))
}

#[get("/admin/webhook-deliveries/{id}")]
pub async fn get_delivery(
    _admin: AdminGuard,
    engine: web::Data<DeliveryEngine>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let delivery = engine.get_delivery(path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(json!({ "webhook_delivery": delivery })))
}

#[derive(Debug, Deserialize)]
pub struct SimulateBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub platform: String,
    pub shop_id: String,
    pub event_type: String,
    pub data: Value,
}

impl SimulateBody {
    fn check(&self) -> Result<(), ApiError> {
        if self.kind != "webhook_event" {
            return Err(ApiError::InvalidRequest(
                "type must be 'webhook_event'".to_string(),
            ));
        }
        if self.platform.is_empty() {
            return Err(ApiError::InvalidRequest("platform is required".to_string()));
        }
        if self.shop_id.is_empty() {
            return Err(ApiError::InvalidRequest("shop_id is required".to_string()));
        }
        if !self.data.is_object() {
            return Err(ApiError::InvalidRequest(
                "data must be a JSON object".to_string(),
            ));
        }

        check_event_type(&self.event_type)
    }
}

/// Triggers one event synchronously and reports where each delivery ended
/// up after its first attempt.
#[post("/platform/admin/simulate")]
pub async fn simulate_event(
    _admin: AdminGuard,
    engine: web::Data<DeliveryEngine>,
    body: web::Json<SimulateBody>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    body.check()?;

    let results = engine
        .trigger_webhook_event(&body.platform, &body.shop_id, &body.event_type, body.data)
        .await?;

    let succeeded = results.iter().filter(|r| r.success).count();
    let mut deliveries = Vec::with_capacity(results.len());
    for result in &results {
        let status = match engine.get_delivery(result.delivery_id).await {
            Ok(delivery) => delivery.status.as_str(),
            Err(_) if result.success => "delivered",
            Err(_) => "failed",
        };
        deliveries.push(json!({
            "id": result.delivery_id,
            "status": status,
            "error": result.error,
        }));
    }

    Ok(HttpResponse::Ok().json(json!({
        "message": "Webhook event triggered",
        "event_type": body.event_type,
        "platform": body.platform,
        "shop_id": body.shop_id,
        "summary": {
            "total_deliveries": results.len(),
            "succeeded": succeeded,
            "failed": results.len() - succeeded,
        },
        "deliveries": deliveries,
    })))
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(list_clients)
        .service(create_client)
        .service(get_client)
        .service(update_client)
        .service(revoke_client)
        .service(get_delivery)
        .service(simulate_event);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(kind: &str, event_type: &str, data: Value) -> SimulateBody {
        SimulateBody {
            kind: kind.to_string(),
            platform: "default".to_string(),
            shop_id: "s1".to_string(),
            event_type: event_type.to_string(),
            data,
        }
    }

    #[test]
    fn simulate_body_validation() {
        assert!(body("webhook_event", "order.placed", json!({"order_id": "o1"}))
            .check()
            .is_ok());
        assert!(body("other", "order.placed", json!({})).check().is_err());
        assert!(body("webhook_event", "order.refunded", json!({}))
            .check()
            .is_err());
        assert!(body("webhook_event", "order.placed", json!([1, 2]))
            .check()
            .is_err());
    }
}
