use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("Timeout after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("{0}")]
    Transport(String),
}

/// Outbound HTTP seam used by the delivery engine.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn post(&self, request: OutboundRequest) -> Result<WebhookResponse, SendError>;
}

pub struct ReqwestSender {
    client: Client,
    timeout: Duration,
}

impl ReqwestSender {
    pub fn new(timeout: Duration) -> Result<Self, SendError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("marketlink-webhooks/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SendError::Transport(e.to_string()))?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl HttpSender for ReqwestSender {
    async fn post(&self, request: OutboundRequest) -> Result<WebhookResponse, SendError> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.body(request.body).send().await.map_err(|e| {
            if e.is_timeout() {
                SendError::Timeout(self.timeout)
            } else {
                SendError::Transport(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        Ok(WebhookResponse { status, body })
    }
}
