use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::database::models::{Grant, UserType};

/// Token endpoint body. Every field is optional so that missing values
/// surface as `invalid_request` instead of a deserializer rejection.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub refresh_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub user_id: String,
    pub user_type: UserType,
}

/// Identity behind a live access token.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ValidatedToken {
    pub user_id: String,
    pub user_type: UserType,
    pub client_id: String,
    pub scope: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeQuery {
    pub client_id: Option<String>,
    pub response_type: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

/// Login form submitted back to `POST /oauth/authorize`.
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeForm {
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub response_type: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub user_type: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grants: Option<Vec<Grant>>,
    pub scopes: Option<Vec<String>>,
}

/// Returned once, at creation. The plaintext secret is not recoverable.
#[derive(Debug, Serialize)]
pub struct CreatedClient {
    pub id: Uuid,
    pub client_id: String,
    pub client_secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grants: Vec<Grant>,
    pub scopes: Vec<String>,
}
