use actix_web::{dev::Payload, http::header, web, Error as ActixWebError, FromRequest, HttpRequest};
use futures::future::{ready, LocalBoxFuture, Ready};
use futures::FutureExt;
use secrecy::{ExposeSecret, Secret};
use subtle::ConstantTimeEq;

use super::schemas::ValidatedToken;
use crate::errors::ApiError;
use crate::oauth::OAuthServer;

/// Admin API key, registered as app data.
#[derive(Clone)]
pub struct AdminKey(pub Secret<String>);

fn header_value<'a>(req: &'a HttpRequest, name: header::HeaderName) -> Option<&'a str> {
    req.headers().get(name).and_then(|value| value.to_str().ok())
}

fn bearer_token(req: &HttpRequest) -> Result<String, ApiError> {
    let value = header_value(req, header::AUTHORIZATION).ok_or_else(|| {
        ApiError::Unauthorized("Missing or invalid Authorization header".to_string())
    })?;

    match value.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(ApiError::Unauthorized(
            "Missing or invalid Authorization header".to_string(),
        )),
    }
}

/// Extractor for routes that require a live OAuth access token.
#[derive(Debug, Clone)]
pub struct BearerAuth {
    pub token: ValidatedToken,
}

impl FromRequest for BearerAuth {
    type Error = ActixWebError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let server = match req.app_data::<web::Data<OAuthServer>>() {
            Some(server) => server.clone(),
            None => {
                return ready(Err(ApiError::ServerError(
                    "OAuth server is not configured".to_string(),
                )
                .into()))
                .boxed_local()
            }
        };

        let token = match bearer_token(req) {
            Ok(token) => token,
            Err(e) => return ready(Err(e.into())).boxed_local(),
        };

        authenticate(server, token).boxed_local()
    }
}

async fn authenticate(
    server: web::Data<OAuthServer>,
    token: String,
) -> Result<BearerAuth, ActixWebError> {
    match server.tokens.validate_access_token(&token).await? {
        Some(validated) => Ok(BearerAuth { token: validated }),
        None => Err(ApiError::Unauthorized("Access token is invalid or expired".to_string()).into()),
    }
}

/// Extractor for administrative routes. Accepts the configured key as
/// `X-Admin-Key` or as a bearer token.
#[derive(Debug, Clone, Copy)]
pub struct AdminGuard;

impl FromRequest for AdminGuard {
    type Error = ActixWebError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let key = match req.app_data::<web::Data<AdminKey>>() {
            Some(key) => key.clone(),
            None => {
                return ready(Err(ApiError::ServerError(
                    "admin key is not configured".to_string(),
                )
                .into()))
            }
        };

        let presented = header_value(req, header::HeaderName::from_static("x-admin-key"))
            .map(str::to_string)
            .or_else(|| bearer_token(req).ok());

        let expected = key.0.expose_secret().as_bytes();
        let allowed = match presented {
            Some(presented) if !expected.is_empty() => {
                bool::from(presented.as_bytes().ct_eq(expected))
            }
            _ => false,
        };

        if allowed {
            ready(Ok(AdminGuard))
        } else {
            ready(Err(ApiError::Unauthorized("Invalid admin credentials".to_string()).into()))
        }
    }
}
