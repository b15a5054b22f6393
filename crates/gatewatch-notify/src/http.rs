//! Multipart upload to a LAN receiver (e.g. a Raspberry Pi display box).
//!
//! `POST {base}/upload` with a `message` text field and, when present, an
//! `image` file part. `GET {base}/status` reports receiver health.

use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::{multipart, Client, StatusCode};
use std::time::Duration;

const SNAPSHOT_FILENAME: &str = "snapshot.jpg";
const SNAPSHOT_MIME: &str = "image/jpeg";

pub struct HttpUploadTransport {
    client: Client,
    base_url: String,
}

impl HttpUploadTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let base_url = base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(TransportError::InvalidConfig(format!(
                "upload url must be http(s), got {base_url:?}"
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    pub fn upload_url(&self) -> String {
        format!("{}/upload", self.base_url)
    }

    pub fn status_url(&self) -> String {
        format!("{}/status", self.base_url)
    }

    /// Query the receiver's status endpoint.
    pub async fn check_status(&self) -> Result<serde_json::Value, TransportError> {
        let response = self.client.get(self.status_url()).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }

    async fn post(&self, form: multipart::Form) -> Result<(), TransportError> {
        let response = self
            .client
            .post(self.upload_url())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status != StatusCode::OK {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        tracing::debug!(url = %self.upload_url(), response = %body, "upload accepted");
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpUploadTransport {
    async fn send_text(&self, message: &str) -> Result<(), TransportError> {
        let form = multipart::Form::new().text("message", message.to_string());
        self.post(form).await
    }

    async fn send_image(&self, message: &str, image: &[u8]) -> Result<(), TransportError> {
        let part = multipart::Part::bytes(image.to_vec())
            .file_name(SNAPSHOT_FILENAME)
            .mime_str(SNAPSHOT_MIME)?;
        let form = multipart::Form::new()
            .text("message", message.to_string())
            .part("image", part);
        self.post(form).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_urls_strip_trailing_slash() {
        let t = HttpUploadTransport::new("http://192.168.1.20:8000/", Duration::from_secs(5)).unwrap();
        assert_eq!(t.upload_url(), "http://192.168.1.20:8000/upload");
        assert_eq!(t.status_url(), "http://192.168.1.20:8000/status");
    }

    #[test]
    fn test_rejects_non_http_url() {
        assert!(matches!(
            HttpUploadTransport::new("192.168.1.20:8000", Duration::from_secs(5)),
            Err(TransportError::InvalidConfig(_))
        ));
    }

    fn receiver(server: &mockito::Server) -> HttpUploadTransport {
        HttpUploadTransport::new(&server.url(), Duration::from_secs(5)).unwrap()
    }

    fn multipart_header() -> Matcher {
        Matcher::Regex("^multipart/form-data; boundary=".into())
    }

    #[tokio::test]
    async fn test_send_image_posts_message_and_snapshot() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/upload")
            .match_header("content-type", multipart_header())
            .match_body(Matcher::AllOf(vec![
                Matcher::Regex("name=\"message\"\r\n\r\nalice spotted\r\n".into()),
                Matcher::Regex("name=\"image\"; filename=\"snapshot.jpg\"".into()),
                Matcher::Regex("(?i)content-type: image/jpeg\r\n\r\nJPEGDATA".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"status":"ok"}"#)
            .create_async()
            .await;

        receiver(&server)
            .send("alice spotted", Some(b"JPEGDATA".as_slice()))
            .await
            .unwrap();
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_send_text_posts_message_field() {
        let mut server = mockito::Server::new_async().await;
        let upload = server
            .mock("POST", "/upload")
            .match_header("content-type", multipart_header())
            .match_body(Matcher::Regex(
                "name=\"message\"\r\n\r\nNew user enrolled: bob\r\n".into(),
            ))
            .with_status(200)
            .create_async()
            .await;

        receiver(&server)
            .send_text("New user enrolled: bob")
            .await
            .unwrap();
        upload.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_200_upload_is_failure() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .with_status(500)
            .with_body("disk full")
            .create_async()
            .await;

        let err = receiver(&server).send_text("hello").await.unwrap_err();
        assert!(
            matches!(err, TransportError::Status { status: 500, ref body } if body == "disk full"),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_created_is_not_accepted() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/upload")
            .with_status(201)
            .create_async()
            .await;

        let err = receiver(&server).send_text("hello").await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 201, .. }));
    }

    #[tokio::test]
    async fn test_check_status() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"status":"running","messages":3}"#)
            .create_async()
            .await;

        let status = receiver(&server).check_status().await.unwrap();
        assert_eq!(status["status"], "running");
        assert_eq!(status["messages"], 3);
    }

    #[tokio::test]
    async fn test_check_status_unavailable() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/status")
            .with_status(503)
            .with_body("starting")
            .create_async()
            .await;

        assert!(matches!(
            receiver(&server).check_status().await,
            Err(TransportError::Status { status: 503, .. })
        ));
    }
}
