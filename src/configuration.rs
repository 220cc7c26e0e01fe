use std::time::Duration;

use config::ConfigError;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub database: DatabaseSettings,
    #[serde(default)]
    pub oauth: OAuthSettings,
    #[serde(default)]
    pub webhook: WebhookSettings,
    pub admin: AdminSettings,
    #[serde(default)]
    pub tasks: TaskSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub host: String,
    pub base_url: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub url: Secret<String>,
    #[serde(default = "default_max_connections")]
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_connections: u32,
}

/// Lifetimes of the credentials minted by the authorization server.
#[derive(Deserialize, Clone, Debug)]
pub struct OAuthSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub authorization_code_ttl_secs: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub access_token_ttl_secs: i64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub refresh_token_ttl_secs: i64,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            authorization_code_ttl_secs: 600,
            access_token_ttl_secs: 7200,
            refresh_token_ttl_secs: 1_209_600,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct WebhookSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub delivery_timeout_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_attempts: i32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_interval_secs: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub error_truncate_len: usize,
}

/// Upper bound accepted for `webhook.max_attempts`.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 100;

impl WebhookSettings {
    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_DELIVERY_ATTEMPTS).contains(&self.max_attempts) {
            return Err(ConfigError::Message(format!(
                "webhook.max_attempts must be between 1 and {}, got {}",
                MAX_DELIVERY_ATTEMPTS, self.max_attempts
            )));
        }
        if self.delivery_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "webhook.delivery_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            delivery_timeout_secs: 30,
            max_attempts: 3,
            retry_interval_secs: 60,
            error_truncate_len: 200,
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct AdminSettings {
    pub api_key: Secret<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TaskSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub credential_cleanup_interval_secs: u64,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            credential_cleanup_interval_secs: 15 * 60,
        }
    }
}

fn default_max_connections() -> u32 {
    16
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

pub fn get_configuration() -> Result<Settings, ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| ConfigError::Message(format!("Failed to determine the current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    let settings = settings.try_deserialize::<Settings>()?;
    settings.webhook.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn defaults_match_documented_lifetimes() {
        let oauth = OAuthSettings::default();
        assert_eq!(oauth.authorization_code_ttl_secs, 600);
        assert_eq!(oauth.access_token_ttl_secs, 7200);
        assert_eq!(oauth.refresh_token_ttl_secs, 1_209_600);

        let webhook = WebhookSettings::default();
        assert_eq!(webhook.max_attempts, 3);
        assert_eq!(webhook.delivery_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn environment_parsing() {
        assert!(matches!(
            Environment::try_from("Production".to_string()),
            Ok(Environment::Production)
        ));
        assert!(Environment::try_from("staging".to_string()).is_err());
    }

    #[test]
    fn settings_deserialize_with_string_numbers() {
        let settings = config::Config::builder()
            .set_default("application.host", "127.0.0.1")
            .and_then(|b| b.set_default("application.port", "8080"))
            .and_then(|b| b.set_default("application.base_url", "http://localhost:8080"))
            .and_then(|b| b.set_default("database.url", "postgres://localhost/marketlink"))
            .and_then(|b| b.set_default("admin.api_key", "admin-key"))
            .and_then(|b| b.set_default("webhook.delivery_timeout_secs", "5"))
            .and_then(|b| b.set_default("webhook.max_attempts", "4"))
            .and_then(|b| b.set_default("webhook.retry_interval_secs", "30"))
            .and_then(|b| b.set_default("webhook.error_truncate_len", "100"))
            .and_then(|b| b.build())
            .and_then(|c| c.try_deserialize::<Settings>())
            .expect("settings should deserialize");

        assert_eq!(settings.application.port, 8080);
        assert_eq!(settings.database.max_connections, 16);
        assert_eq!(settings.webhook.max_attempts, 4);
        assert_eq!(settings.oauth.access_token_ttl_secs, 7200);
        assert_eq!(settings.admin.api_key.expose_secret(), "admin-key");
    }

    #[test]
    fn webhook_attempt_limits_are_enforced() {
        assert!(WebhookSettings::default().validate().is_ok());

        for max_attempts in [0, -1, MAX_DELIVERY_ATTEMPTS + 1, i32::MAX] {
            let webhook = WebhookSettings {
                max_attempts,
                ..WebhookSettings::default()
            };
            assert!(matches!(webhook.validate(), Err(ConfigError::Message(_))));
        }

        let webhook = WebhookSettings {
            max_attempts: MAX_DELIVERY_ATTEMPTS,
            ..WebhookSettings::default()
        };
        assert!(webhook.validate().is_ok());

        let webhook = WebhookSettings {
            delivery_timeout_secs: 0,
            ..WebhookSettings::default()
        };
        assert!(webhook.validate().is_err());
    }
}
