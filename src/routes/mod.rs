use actix_web::{error::JsonPayloadError, web, HttpRequest};

use crate::errors::ApiError;

pub mod admin;
pub mod oauth;
pub mod webhooks;

pub use admin::admin_config;
pub use oauth::oauth_config;
pub use webhooks::webhooks_config;

/// Malformed JSON bodies come back in the `{error, error_description}`
/// shape instead of actix's plain-text rejection.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err: JsonPayloadError, _req: &HttpRequest| {
        ApiError::InvalidRequest(format!("Invalid request body: {}", err)).into()
    })
}
