//! Возможности движка согласования.
//!
//! Движок создаёт offer/answer, хранит локальное и удалённое описание,
//! находит локальные ICE-кандидаты и отдаёт входящие треки. Сессия работает
//! с ним только через этот трейт; `WebrtcEngine` реализация на webrtc-rs.

use crate::config::SessionConfig;
use crate::error::SignalingResult;
use crate::peer::types::{ConnectionState, IceCandidate, MediaTrack, SessionDescription};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Вызывается на каждый найденный локальный кандидат
pub type OnLocalCandidateFn = Box<dyn FnMut(IceCandidate) -> HandlerFuture + Send + Sync>;

/// Вызывается на каждый входящий трек
pub type OnTrackFn = Box<dyn Fn(MediaTrack) + Send + Sync>;

pub type OnConnectionStateFn = Box<dyn Fn(ConnectionState) + Send + Sync>;

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn create_offer(&self) -> SignalingResult<SessionDescription>;

    async fn create_answer(&self) -> SignalingResult<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> SignalingResult<()>;

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalingResult<()>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalingResult<()>;

    /// Привязывает локальный трек к исходящей стороне соединения
    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> SignalingResult<()>;

    /// Заменяет ранее установленный обработчик
    fn on_ice_candidate(&self, handler: OnLocalCandidateFn);

    fn on_track(&self, handler: OnTrackFn);

    fn on_connection_state_change(&self, handler: OnConnectionStateFn);

    async fn close(&self) -> SignalingResult<()>;
}

/// Создаёт движок для сессии в момент media-ready
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, config: &SessionConfig) -> SignalingResult<Arc<dyn NegotiationEngine>>;
}
