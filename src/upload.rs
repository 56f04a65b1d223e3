//! Загрузка готовых записей.

use crate::error::{SignalingError, SignalingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Тело запроса: `{ "data": "<data url>" }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadPayload {
    pub data: String,
}

#[async_trait]
pub trait UploadSink: Send + Sync {
    async fn upload(&self, payload: &UploadPayload) -> SignalingResult<()>;
}

/// POST с JSON-телом; любой 2xx считается успехом
pub struct HttpUploadSink {
    client: reqwest::Client,
    url: String,
}

impl HttpUploadSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl UploadSink for HttpUploadSink {
    async fn upload(&self, payload: &UploadPayload) -> SignalingResult<()> {
        debug!(
            "Uploading recording to {} ({} bytes encoded)",
            self.url,
            payload.data.len()
        );
        let response = self.client.post(&self.url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SignalingError::upload(format!(
                "{} responded with {}",
                self.url, status
            )));
        }
        info!("Recording uploaded, status {}", status);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_shape() {
        let payload = UploadPayload {
            data: "data:video/webm;base64,".into(),
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"data":"data:video/webm;base64,"}"#
        );
    }

    #[tokio::test]
    async fn unreachable_sink_reports_upload_failed() {
        let sink = HttpUploadSink::new("http://127.0.0.1:9/api/upload");
        let err = sink
            .upload(&UploadPayload {
                data: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::UploadFailed { .. }));
    }
}
