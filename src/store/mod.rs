//! Общее хранилище документов для сигнализации.
//!
//! Структура одного звонка:
//!
//! ```text
//! calls/{id}                    { id, offer?, answer? }
//! calls/{id}/offerCandidates    только добавление, пишет вызывающий
//! calls/{id}/answerCandidates   только добавление, пишет вызываемый
//! ```
//!
//! Здесь только способ доступа. Транспорт и хранение за реализацией;
//! [`MemoryStore`] держит всё в процессе.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::SignalingResult;
use crate::peer::types::{
    CallDocument, CallId, CandidateCollection, CandidateEntry, IceCandidate, SessionDescription,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Получает документ звонка при подписке и после каждого изменения
pub type CallChangeHandler = Arc<dyn Fn(CallDocument) + Send + Sync>;

/// Получает все записи на момент подписки, затем каждую новую.
/// Доставка at-least-once.
pub type CandidateAddedHandler = Arc<dyn Fn(CandidateEntry) + Send + Sync>;

/// Частичное обновление существующего документа
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallUpdate {
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
}

impl CallUpdate {
    pub fn offer(desc: SessionDescription) -> Self {
        Self {
            offer: Some(desc),
            answer: None,
        }
    }

    pub fn answer(desc: SessionDescription) -> Self {
        Self {
            offer: None,
            answer: Some(desc),
        }
    }
}

#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Создаёт пустой документ звонка с новым id
    async fn create_call(&self) -> SignalingResult<CallId>;

    async fn get_call(&self, id: &CallId) -> SignalingResult<Option<CallDocument>>;

    /// Сливает `update` в документ; `RecordNotFound`, если его нет
    async fn update_call(&self, id: &CallId, update: CallUpdate) -> SignalingResult<()>;

    /// Добавляет кандидат в коллекцию и возвращает сохранённую запись
    async fn add_candidate(
        &self,
        id: &CallId,
        collection: CandidateCollection,
        candidate: IceCandidate,
    ) -> SignalingResult<CandidateEntry>;

    fn subscribe_call(&self, id: &CallId, handler: CallChangeHandler)
        -> SignalingResult<Subscription>;

    fn subscribe_candidates(
        &self,
        id: &CallId,
        collection: CandidateCollection,
        handler: CandidateAddedHandler,
    ) -> SignalingResult<Subscription>;
}

/// Дескриптор подписки. Отменяется явно или при drop; после отмены
/// хранилище ничего не доставляет.
#[derive(Debug)]
pub struct Subscription {
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// Дескриптор и флаг, который хранилище проверяет перед доставкой
    pub fn pair() -> (Self, Arc<AtomicBool>) {
        let active = Arc::new(AtomicBool::new(true));
        (
            Self {
                active: Arc::clone(&active),
            },
            active,
        )
    }

    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
