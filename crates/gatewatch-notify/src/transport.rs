//! Outbound notification transports.

use crate::http::HttpUploadTransport;
use crate::telegram::TelegramTransport;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("receiver returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("receiver rejected message: {0}")]
    Rejected(String),
    #[error("send timed out after {0:?}")]
    Timeout(Duration),
    #[error("invalid transport configuration: {0}")]
    InvalidConfig(String),
}

/// Delivers one notification to the outside world.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, message: &str) -> Result<(), TransportError>;

    async fn send_image(&self, message: &str, image: &[u8]) -> Result<(), TransportError>;

    /// Send with an optional JPEG attachment.
    async fn send(&self, message: &str, image: Option<&[u8]>) -> Result<(), TransportError> {
        match image {
            Some(bytes) => self.send_image(message, bytes).await,
            None => self.send_text(message).await,
        }
    }
}

/// Dry-run transport that only logs what would be sent.
pub struct LogTransport;

#[async_trait]
impl Transport for LogTransport {
    async fn send_text(&self, message: &str) -> Result<(), TransportError> {
        tracing::info!(message, "notification");
        Ok(())
    }

    async fn send_image(&self, message: &str, image: &[u8]) -> Result<(), TransportError> {
        tracing::info!(message, image_bytes = image.len(), "notification with snapshot");
        Ok(())
    }
}

/// Which transport to build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    #[default]
    Log,
    /// Multipart upload receiver at `url` (`POST {url}/upload`).
    Http { url: String },
    Telegram { token: String, chat_id: String },
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Log => "log",
            TransportConfig::Http { .. } => "http",
            TransportConfig::Telegram { .. } => "telegram",
        }
    }

    /// Build the configured transport. `timeout` bounds each HTTP request.
    pub fn build(&self, timeout: Duration) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(match self {
            TransportConfig::Log => Arc::new(LogTransport),
            TransportConfig::Http { url } => Arc::new(HttpUploadTransport::new(url, timeout)?),
            TransportConfig::Telegram { token, chat_id } => {
                Arc::new(TelegramTransport::new(token, chat_id, timeout)?)
            }
        })
    }
}
