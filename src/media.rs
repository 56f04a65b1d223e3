//! Возможности движка захвата.
//!
//! Захват камеры/микрофона и кодирование чанков записи живут вне крейта;
//! сессия управляет ими через [`CaptureEngine`].

use crate::error::SignalingResult;
use crate::peer::types::MediaStream;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Получает закодированные чанки в порядке захвата
pub type OnChunkFn = Box<dyn Fn(Bytes) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingOptions {
    /// Mime кодировщика, например `video/webm; codecs=vp9`
    pub mime_type: String,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            mime_type: "video/webm; codecs=vp9".into(),
        }
    }
}

impl RecordingOptions {
    /// Тип контейнера без параметров кодека (`video/webm`)
    pub fn container_type(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .map(str::trim)
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait CaptureEngine: Send + Sync {
    async fn acquire_local_stream(&self, constraints: &MediaConstraints)
        -> SignalingResult<MediaStream>;

    async fn start_recording(
        &self,
        stream: &MediaStream,
        options: &RecordingOptions,
        on_chunk: OnChunkFn,
    ) -> SignalingResult<()>;

    /// Останавливает запись; последний чанк доставляется до возврата
    async fn stop_recording(&self) -> SignalingResult<()>;
}
