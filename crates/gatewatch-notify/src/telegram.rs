//! Telegram Bot API transport: `sendMessage` for text, `sendPhoto` for snapshots.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://api.telegram.org";

/// Envelope every Bot API method returns.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

pub struct TelegramTransport {
    client: Client,
    api_base: String,
    token: String,
    chat_id: String,
}

impl TelegramTransport {
    pub fn new(token: &str, chat_id: &str, timeout: Duration) -> Result<Self, TransportError> {
        if token.is_empty() || chat_id.is_empty() {
            return Err(TransportError::InvalidConfig(
                "telegram transport needs both a bot token and a chat id".into(),
            ));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            token: token.to_string(),
            chat_id: chat_id.to_string(),
        })
    }

    /// Talk to a different Bot API server, such as a self-hosted
    /// `telegram-bot-api` instance.
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn check(response: reqwest::Response) -> Result<(), TransportError> {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiResponse>(&text) {
            Ok(api) if api.ok => Ok(()),
            Ok(api) => Err(TransportError::Rejected(
                api.description.unwrap_or_else(|| "no description".into()),
            )),
            Err(_) => Err(TransportError::Status {
                status: status.as_u16(),
                body: text,
            }),
        }
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(&self, message: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": message,
            }))
            .send()
            .await?;
        Self::check(response).await
    }

    async fn send_image(&self, message: &str, image: &[u8]) -> Result<(), TransportError> {
        let photo = multipart::Part::bytes(image.to_vec())
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")?;
        let form = multipart::Form::new()
            .text("chat_id", self.chat_id.clone())
            .text("caption", message.to_string())
            .part("photo", photo);

        let response = self
            .client
            .post(self.method_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        Self::check(response).await
    }
}
