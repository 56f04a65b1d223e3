use crate::config::ServerConfig;
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

// Функция для добавления схемы протокола к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    // Если url уже начинается с "turn:" или "stun:", возвращаем как есть
    if config.url.starts_with("turn:") || config.url.starts_with("stun:") {
        config.url.clone()
    } else {
        // В зависимости от типа сервера добавляем нужную схему
        let scheme = if config.r#type == "turn" {
            "turn:"
        } else {
            "stun:"
        };
        format!("{}{}", scheme, config.url)
    }
}

/// `data:<mime>;base64,<payload>`
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        general_purpose::STANDARD.encode(bytes)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_ids_are_hex_and_distinct() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn scheme_added_by_server_type() {
        let turn = ServerConfig::turn("t", "relay.example.org:3478", "u", "p");
        assert_eq!(add_ice_url_scheme(&turn), "turn:relay.example.org:3478");

        let stun = ServerConfig::stun("s", "stun:stun1.l.google.com:19302");
        assert_eq!(add_ice_url_scheme(&stun), "stun:stun1.l.google.com:19302");
    }

    #[test]
    fn data_url_of_empty_blob() {
        assert_eq!(data_url("video/webm", &[]), "data:video/webm;base64,");
        assert_eq!(data_url("video/webm", b"hi"), "data:video/webm;base64,aGk=");
    }
}
