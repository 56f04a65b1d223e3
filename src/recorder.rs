//! Запись сессии.
//!
//! Собирает закодированные чанки локального потока от media-ready до hangup
//! и склеивает их в один [`Recording`].

use crate::error::SignalingResult;
use crate::media::{CaptureEngine, OnChunkFn, RecordingOptions};
use crate::peer::types::MediaStream;
use crate::upload::UploadPayload;
use crate::utils::data_url;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SessionRecorder {
    chunks: Arc<Mutex<Vec<Bytes>>>,
    options: RecordingOptions,
}

impl SessionRecorder {
    pub fn new(options: RecordingOptions) -> Self {
        Self {
            chunks: Arc::new(Mutex::new(Vec::new())),
            options,
        }
    }

    /// Запускает запись `stream` через движок захвата
    pub async fn start(
        capture: &dyn CaptureEngine,
        stream: &MediaStream,
        options: RecordingOptions,
    ) -> SignalingResult<Self> {
        let recorder = Self::new(options);
        capture
            .start_recording(stream, &recorder.options, recorder.chunk_handler())
            .await?;
        info!("Recording started ({})", recorder.options.mime_type);
        Ok(recorder)
    }

    /// Обработчик для движка захвата; пустые чанки отбрасываются
    pub fn chunk_handler(&self) -> OnChunkFn {
        let chunks = Arc::clone(&self.chunks);
        Box::new(move |chunk: Bytes| {
            if chunk.is_empty() {
                return;
            }
            let mut chunks = chunks.lock();
            chunks.push(chunk);
            debug!("Recorded chunk #{}", chunks.len());
        })
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.lock().len()
    }

    /// Останавливает запись и склеивает всё, что успело прийти.
    ///
    /// Ошибка остановки только логируется; пришедшие чанки всё равно собираются.
    pub async fn finalize(self, capture: &dyn CaptureEngine) -> Recording {
        if let Err(e) = capture.stop_recording().await {
            warn!("Failed to stop recorder cleanly: {}", e);
        }
        self.assemble()
    }

    fn assemble(self) -> Recording {
        let chunks = std::mem::take(&mut *self.chunks.lock());
        let mut data = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
        for chunk in &chunks {
            data.extend_from_slice(chunk);
        }
        let mime_type = self.options.container_type().to_string();
        let file_name = format!(
            "{}-localstream.{}",
            Utc::now().timestamp_millis(),
            extension_for(&mime_type)
        );
        info!(
            "Recording assembled: {} chunks, {} bytes",
            chunks.len(),
            data.len()
        );
        Recording {
            data: data.freeze(),
            mime_type,
            file_name,
        }
    }
}

fn extension_for(mime_type: &str) -> &str {
    mime_type
        .rsplit('/')
        .next()
        .filter(|ext| !ext.is_empty())
        .unwrap_or("bin")
}

/// Готовая запись; доступна для скачивания при любом исходе загрузки
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recording {
    pub data: Bytes,
    pub mime_type: String,
    pub file_name: String,
}

impl Recording {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_data_url(&self) -> String {
        data_url(&self.mime_type, &self.data)
    }

    pub fn upload_payload(&self) -> UploadPayload {
        UploadPayload {
            data: self.to_data_url(),
        }
    }

    /// Сохраняет запись в `dir` под именем для скачивания
    pub async fn save(&self, dir: impl AsRef<Path>) -> SignalingResult<PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        tokio::fs::write(&path, &self.data).await?;
        debug!("Recording saved to {}", path.display());
        Ok(path)
    }
}
