// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::{SignalingError, SignalingResult};
use crate::media::{MediaConstraints, RecordingOptions};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене логирование отключено

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    // ВАЖНО: Эта настройка работает только в debug режиме!
    pub const ENABLE_LOGGING: bool = true;
}

#[cfg(not(debug_assertions))]
pub mod dev {
    // В продакшене все дополнительные настройки отключены
    pub const ENABLE_LOGGING: bool = false;
}

/// Куда отправляется запись после завершения звонка
pub const DEFAULT_UPLOAD_URL: &str = "/api/upload";

/// Размер пула ICE кандидатов по умолчанию
pub const DEFAULT_ICE_CANDIDATE_POOL_SIZE: u8 = 10;

/// Конфигурация ICE сервера
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn stun(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            r#type: "stun".into(),
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        id: impl Into<String>,
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            r#type: "turn".into(),
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

/// Дефолтные STUN серверы
pub fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig::stun("default-stun-1", "stun:stun1.l.google.com:19302"),
        ServerConfig::stun("default-stun-2", "stun:stun2.l.google.com:19302"),
    ]
}

/// Настройки одного звонка
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    pub upload_url: String,
    pub recording: RecordingOptions,
    pub media: MediaConstraints,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: DEFAULT_ICE_CANDIDATE_POOL_SIZE,
            upload_url: DEFAULT_UPLOAD_URL.into(),
            recording: RecordingOptions::default(),
            media: MediaConstraints::default(),
        }
    }
}

impl SessionConfig {
    /// Разбирает JSON и сразу валидирует
    pub fn from_json(json: &str) -> SignalingResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Загружает конфигурацию из файла
    pub fn load(path: impl AsRef<Path>) -> SignalingResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Заменяет ICE серверы, возвращает ошибку если список невалиден
    pub fn with_ice_servers(mut self, servers: Vec<ServerConfig>) -> SignalingResult<Self> {
        tracing::debug!("Setting {} custom ICE servers", servers.len());
        self.ice_servers = servers;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> SignalingResult<()> {
        // Валидация серверов
        for server in &self.ice_servers {
            if server.url.trim().is_empty() {
                return Err(SignalingError::config(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(SignalingError::config(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }

        if self.upload_url.trim().is_empty() {
            return Err(SignalingError::config("upload URL cannot be empty"));
        }

        if !self.media.audio && !self.media.video {
            return Err(SignalingError::config(
                "at least one of audio or video must be requested",
            ));
        }

        Ok(())
    }
}
