use actix_web::{get, http::header, post, web, HttpRequest, HttpResponse, Responder};
use base64::{engine::general_purpose, Engine as _};
use log::warn;

use crate::{
    auth::schemas::TokenRequest,
    configuration::Settings,
    errors::ApiError,
    oauth::{ExchangeCode, OAuthServer, RefreshRequest},
};

/// `client_id:client_secret` from an HTTP Basic header, if present and
/// well formed.
fn basic_credentials(req: &HttpRequest) -> Option<(String, String)> {
    let value = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (id, secret) = credentials.split_once(':')?;

    Some((id.to_owned(), secret.to_owned()))
}

fn required(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[post("/token")]
pub async fn token_endpoint(
    body: web::Either<web::Json<TokenRequest>, web::Form<TokenRequest>>,
    server: web::Data<OAuthServer>,
    req: HttpRequest,
) -> Result<HttpResponse, ApiError> {
    let info = match body {
        web::Either::Left(data) => data.into_inner(),
        web::Either::Right(data) => data.into_inner(),
    };

    let mut client_id = required(info.client_id);
    let mut client_secret = required(info.client_secret);

    if client_id.is_none() {
        if let Some((id, secret)) = basic_credentials(&req) {
            client_id = Some(id);
            client_secret = Some(secret);
        }
    }

    let (grant_type, client_id, client_secret) =
        match (required(info.grant_type), client_id, client_secret) {
            (Some(grant_type), Some(client_id), Some(client_secret)) => {
                (grant_type, client_id, client_secret)
            }
            _ => {
                return Err(ApiError::InvalidRequest(
                    "Missing required parameters: grant_type, client_id, client_secret"
                        .to_string(),
                ))
            }
        };

    let result = match grant_type.as_str() {
        "authorization_code" => {
            let (code, redirect_uri) = match (required(info.code), required(info.redirect_uri)) {
                (Some(code), Some(redirect_uri)) => (code, redirect_uri),
                _ => {
                    return Err(ApiError::InvalidRequest(
                        "Missing required parameters for authorization_code grant: code, redirect_uri"
                            .to_string(),
                    ))
                }
            };

            server
                .tokens
                .exchange_code_for_tokens(ExchangeCode {
                    code,
                    client_id: client_id.clone(),
                    client_secret,
                    redirect_uri,
                })
                .await
        }
        "refresh_token" => {
            let refresh_token = required(info.refresh_token).ok_or_else(|| {
                ApiError::InvalidRequest(
                    "Missing required parameter for refresh_token grant: refresh_token"
                        .to_string(),
                )
            })?;

            server
                .tokens
                .refresh_tokens(RefreshRequest {
                    refresh_token,
                    client_id: client_id.clone(),
                    client_secret,
                    scope: info.scope,
                })
                .await
        }
        other => {
            return Err(ApiError::UnsupportedGrantType(format!(
                "Grant type '{}' is not supported. Supported types: authorization_code, refresh_token",
                other
            )))
        }
    };

    match result {
        Ok(tokens) => Ok(HttpResponse::Ok()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .insert_header((header::PRAGMA, "no-cache"))
            .json(tokens)),
        Err(e) => {
            warn!(
                "Token request from client {} failed: {}: {}",
                client_id,
                e.code(),
                e.description()
            );
            Err(e)
        }
    }
}

/// Discovery document for integrating platforms.
#[get("/handshake")]
pub async fn init_handshake(settings: web::Data<Settings>) -> impl Responder {
    let base_url = settings.application.base_url.trim_end_matches('/');

    HttpResponse::Ok().json(serde_json::json!({
        "authorization_endpoint": format!("{}/oauth/authorize", base_url),
        "token_endpoint": format!("{}/oauth/token", base_url),
        "webhook_endpoint": format!("{}/platform/{{platform}}/webhook", base_url),
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "response_types_supported": ["code"],
        "token_endpoint_auth_methods_supported": ["client_secret_post", "client_secret_basic"],
        "access_token_lifetime": settings.oauth.access_token_ttl_secs,
        "refresh_token_lifetime": settings.oauth.refresh_token_ttl_secs,
    }))
}
