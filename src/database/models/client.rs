use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::UserType;
use crate::errors::StoreError;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    AuthorizationCode,
    RefreshToken,
}

impl Grant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode => "authorization_code",
            Grant::RefreshToken => "refresh_token",
        }
    }

    pub fn all() -> Vec<Grant> {
        vec![Grant::AuthorizationCode, Grant::RefreshToken]
    }
}

impl std::str::FromStr for Grant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authorization_code" => Ok(Grant::AuthorizationCode),
            "refresh_token" => Ok(Grant::RefreshToken),
            other => Err(format!("unknown grant '{}'", other)),
        }
    }
}

/// A registered OAuth client. `client_secret_hash` is an argon2 PHC string;
/// the plaintext secret is never stored.
#[derive(Debug, Clone, Serialize)]
pub struct OAuthClient {
    pub id: Uuid,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grants: Vec<Grant>,
    pub scopes: Vec<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthClient {
    pub fn supports(&self, grant: Grant) -> bool {
        self.grants.contains(&grant)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OAuthClientRow {
    pub id: Uuid,
    pub client_id: String,
    pub client_secret: String,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub grants: Vec<String>,
    pub scopes: Vec<String>,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<OAuthClientRow> for OAuthClient {
    type Error = StoreError;

    fn try_from(row: OAuthClientRow) -> Result<Self, Self::Error> {
        let grants = row
            .grants
            .iter()
            .map(|g| g.parse::<Grant>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(StoreError::Corrupt)?;

        Ok(OAuthClient {
            id: row.id,
            client_id: row.client_id,
            client_secret_hash: row.client_secret,
            name: row.name,
            redirect_uris: row.redirect_uris,
            grants,
            scopes: row.scopes,
            revoked: row.revoked,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Fields an administrator may change on an existing client.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ClientUpdate {
    pub name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub grants: Option<Vec<Grant>>,
    pub scopes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationCode {
    pub id: Uuid,
    pub code: String,
    /// Internal id of the owning client row.
    pub client_id: Uuid,
    pub user_id: String,
    pub user_type: UserType,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct AuthorizationCodeRow {
    pub id: Uuid,
    pub code: String,
    pub client_id: Uuid,
    pub user_id: String,
    pub user_type: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl TryFrom<AuthorizationCodeRow> for AuthorizationCode {
    type Error = StoreError;

    fn try_from(row: AuthorizationCodeRow) -> Result<Self, Self::Error> {
        Ok(AuthorizationCode {
            id: row.id,
            code: row.code,
            client_id: row.client_id,
            user_id: row.user_id,
            user_type: row.user_type.parse().map_err(StoreError::Corrupt)?,
            redirect_uri: row.redirect_uri,
            scope: row.scope,
            state: row.state,
            expires_at: row.expires_at,
            revoked: row.revoked,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn table(&self) -> &'static str {
        match self {
            TokenKind::Access => "oauth_access_token",
            TokenKind::Refresh => "oauth_refresh_token",
        }
    }
}

/// An access or refresh token row; which one is carried by [`TokenKind`].
#[derive(Debug, Clone, Serialize)]
pub struct OAuthToken {
    pub id: Uuid,
    pub token: String,
    pub client_id: Uuid,
    pub user_id: String,
    pub user_type: UserType,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

#[derive(Debug, sqlx::FromRow)]
pub struct OAuthTokenRow {
    pub id: Uuid,
    pub token: String,
    pub client_id: Uuid,
    pub user_id: String,
    pub user_type: String,
    pub scope: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl TryFrom<OAuthTokenRow> for OAuthToken {
    type Error = StoreError;

    fn try_from(row: OAuthTokenRow) -> Result<Self, Self::Error> {
        Ok(OAuthToken {
            id: row.id,
            token: row.token,
            client_id: row.client_id,
            user_id: row.user_id,
            user_type: row.user_type.parse().map_err(StoreError::Corrupt)?,
            scope: row.scope,
            expires_at: row.expires_at,
            revoked: row.revoked,
        })
    }
}

/// Rows flipped to revoked by a client-wide revocation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RevokedCounts {
    pub authorization_codes: u64,
    pub access_tokens: u64,
    pub refresh_tokens: u64,
}
