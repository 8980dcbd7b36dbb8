use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::json;

use crate::config::ChatApiConfig;
use crate::error::DeliveryError;
use crate::utils::chat::MessageSender;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SendResponse {
    #[serde(default)]
    messages: Vec<SentMessage>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

// Sends text messages through the WhatsApp Business Cloud API.
pub struct WhatsAppSender {
    client: Client,
    endpoint: String,
    token: Secret<String>,
}

impl WhatsAppSender {
    pub fn new(config: &ChatApiConfig) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Transport(format!("Failed to build the client: {e}")))?;
        let endpoint = format!(
            "{}/{}/messages",
            config.api_url.as_str().trim_end_matches('/'),
            config.phone_number_id
        );
        Ok(Self {
            client,
            endpoint,
            token: config.token.clone(),
        })
    }
}

// The API wants international numbers without the leading '+'.
pub fn normalize_number(recipient: &str) -> &str {
    let recipient = recipient.trim();
    recipient.strip_prefix('+').unwrap_or(recipient)
}

#[async_trait]
impl MessageSender for WhatsAppSender {
    fn channel(&self) -> &'static str {
        "whatsapp"
    }

    async fn send_message(&self, recipient: &str, text: &str) -> Result<String, DeliveryError> {
        let payload = json!({
            "messaging_product": "whatsapp",
            "to": normalize_number(recipient),
            "type": "text",
            "text": { "body": text },
        });
        debug!("POST {} for {}", self.endpoint, recipient);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.token.expose_secret())
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Authentication(format!("access token refused ({status}): {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let sent: SendResponse = response.json().await?;
        Ok(sent
            .messages
            .into_iter()
            .next()
            .map(|m| m.id)
            .unwrap_or_else(|| "unknown".to_string()))
    }
}
