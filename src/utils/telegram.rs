use async_trait::async_trait;
use secrecy::ExposeSecret;
use teloxide::prelude::{ChatId, Requester};
use teloxide::{ApiError, Bot, RequestError};
use url::Url;

use crate::config::TelegramConfig;
use crate::error::DeliveryError;
use crate::utils::chat::MessageSender;

// Sends the report to a Telegram chat through a bot. Recipients are numeric
// chat ids.
pub struct TelegramSender {
    bot: Bot,
}

impl TelegramSender {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            bot: Bot::new(config.token.expose_secret()),
        }
    }

    // Points the bot at another Bot API server.
    pub fn with_api_url(mut self, url: Url) -> Self {
        self.bot = self.bot.set_api_url(url);
        self
    }
}

fn delivery_error(e: RequestError) -> DeliveryError {
    match e {
        RequestError::Api(ApiError::NotFound) => {
            DeliveryError::Authentication("Telegram refused the bot token".into())
        }
        RequestError::Api(api) => DeliveryError::Refused(api.to_string()),
        other => DeliveryError::Transport(other.to_string()),
    }
}

#[async_trait]
impl MessageSender for TelegramSender {
    fn channel(&self) -> &'static str {
        "telegram"
    }

    async fn send_message(&self, recipient: &str, text: &str) -> Result<String, DeliveryError> {
        let chat_id: i64 = recipient
            .trim()
            .parse()
            .map_err(|_| DeliveryError::InvalidMessage(format!("{recipient:?} is not a Telegram chat id")))?;

        let message = self
            .bot
            .send_message(ChatId(chat_id), text)
            .await
            .map_err(delivery_error)?;
        Ok(message.id.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use secrecy::Secret;

    fn sender_for(server: &mockito::Server) -> TelegramSender {
        let config = TelegramConfig {
            token: Secret::new("123:abc".into()),
            chat_id: 42,
        };
        TelegramSender::new(&config).with_api_url(server.url().parse().unwrap())
    }

    #[test]
    fn api_errors_keep_their_description() {
        assert!(matches!(
            delivery_error(RequestError::Api(ApiError::NotFound)),
            DeliveryError::Authentication(_)
        ));
        match delivery_error(RequestError::Api(ApiError::ChatNotFound)) {
            DeliveryError::Refused(reason) => assert_eq!(reason, ApiError::ChatNotFound.to_string()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_numeric_chat_id_is_refused_before_sending() {
        let server = mockito::Server::new_async().await;
        let err = sender_for(&server).send_message("@grades", "hi").await.unwrap_err();
        assert!(matches!(err, DeliveryError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn refused_token_is_a_delivery_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", Matcher::Regex(r"(?i)^/bot.+/sendmessage$".into()))
            .with_status(401)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":false,"error_code":401,"description":"Unauthorized"}"#)
            .create_async()
            .await;

        let result = sender_for(&server).send_message("42", "hi").await;

        assert!(result.is_err());
        mock.assert_async().await;
    }
}
