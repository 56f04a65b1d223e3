//! Ошибки сигнализации звонка

use crate::peer::types::SdpType;
use crate::session::SignalingState;
use thiserror::Error;

/// Результат операций сигнализации
pub type SignalingResult<T> = Result<T, SignalingError>;

/// Ошибки, возможные при сигнализации звонка
#[derive(Debug, Error)]
pub enum SignalingError {
    /// Подключение по неизвестному id
    #[error("Call not found: {call_id}")]
    RecordNotFound { call_id: String },

    /// Answer для звонка без offer
    #[error("Call {call_id} has no offer")]
    MissingOffer { call_id: String },

    /// Повторная запись offer или answer
    #[error("Call {call_id} already has an {field}")]
    AlreadySet { call_id: String, field: &'static str },

    /// Описание не того типа
    #[error("Expected {expected} description, got {found}")]
    UnexpectedDescription { expected: SdpType, found: SdpType },

    /// Временный сбой хранилища
    #[error("Store unavailable: {message}")]
    StoreUnavailable { message: String },

    /// Движок отклонил описание или кандидат
    #[error("Negotiation rejected: {message}")]
    NegotiationRejected { message: String },

    /// Сбой движка захвата
    #[error("Capture error: {message}")]
    Capture { message: String },

    /// Загрузка записи не удалась (не фатально)
    #[error("Upload failed: {message}")]
    UploadFailed { message: String },

    /// Действие недопустимо в текущем состоянии
    #[error("Cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SignalingState,
    },

    /// Ошибка конфигурации
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SignalingError {
    pub fn not_found(call_id: impl Into<String>) -> Self {
        Self::RecordNotFound {
            call_id: call_id.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::NegotiationRejected {
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    pub fn upload(message: impl Into<String>) -> Self {
        Self::UploadFailed {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Временные ошибки логируются и повторяются вызывающим кодом
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::UploadFailed { .. }
        )
    }
}

impl From<webrtc::Error> for SignalingError {
    fn from(e: webrtc::Error) -> Self {
        Self::rejected(e.to_string())
    }
}

impl From<reqwest::Error> for SignalingError {
    fn from(e: reqwest::Error) -> Self {
        Self::upload(e.to_string())
    }
}
