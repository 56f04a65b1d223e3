//! Хранилище сигнализации в памяти процесса.
//!
//! Уведомления доставляются синхронно в пишущей задаче, после снятия
//! блокировки. Обработчики должны быть лёгкими и не ходить обратно в
//! хранилище; обработчики сессии только кладут событие в канал.

use super::{
    CallChangeHandler, CallUpdate, CandidateAddedHandler, SignalingStore, Subscription,
};
use crate::error::{SignalingError, SignalingResult};
use crate::peer::types::{CallDocument, CallId, CandidateCollection, CandidateEntry, IceCandidate};
use crate::utils::random_id;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

struct Listener<H> {
    active: Arc<AtomicBool>,
    handler: H,
}

impl<H: Clone> Listener<H> {
    fn live_handler(&self) -> Option<H> {
        self.active
            .load(Ordering::SeqCst)
            .then(|| self.handler.clone())
    }
}

struct CallRecord {
    doc: CallDocument,
    offer_candidates: Vec<CandidateEntry>,
    answer_candidates: Vec<CandidateEntry>,
    call_listeners: Vec<Listener<CallChangeHandler>>,
    offer_listeners: Vec<Listener<CandidateAddedHandler>>,
    answer_listeners: Vec<Listener<CandidateAddedHandler>>,
}

impl CallRecord {
    fn new(id: CallId) -> Self {
        Self {
            doc: CallDocument::empty(id),
            offer_candidates: Vec::new(),
            answer_candidates: Vec::new(),
            call_listeners: Vec::new(),
            offer_listeners: Vec::new(),
            answer_listeners: Vec::new(),
        }
    }

    fn entries(&mut self, collection: CandidateCollection) -> &mut Vec<CandidateEntry> {
        match collection {
            CandidateCollection::OfferCandidates => &mut self.offer_candidates,
            CandidateCollection::AnswerCandidates => &mut self.answer_candidates,
        }
    }

    fn candidate_listeners(
        &mut self,
        collection: CandidateCollection,
    ) -> &mut Vec<Listener<CandidateAddedHandler>> {
        match collection {
            CandidateCollection::OfferCandidates => &mut self.offer_listeners,
            CandidateCollection::AnswerCandidates => &mut self.answer_listeners,
        }
    }

    fn live_call_handlers(&mut self) -> Vec<CallChangeHandler> {
        self.call_listeners
            .retain(|l| l.active.load(Ordering::SeqCst));
        self.call_listeners
            .iter()
            .filter_map(Listener::live_handler)
            .collect()
    }

    fn live_candidate_handlers(
        &mut self,
        collection: CandidateCollection,
    ) -> Vec<CandidateAddedHandler> {
        let listeners = self.candidate_listeners(collection);
        listeners.retain(|l| l.active.load(Ordering::SeqCst));
        listeners
            .iter()
            .filter_map(Listener::live_handler)
            .collect()
    }
}

/// Хранилище документов в памяти, общее для обоих участников
pub struct MemoryStore {
    calls: Mutex<HashMap<CallId, CallRecord>>,
    available: AtomicBool,
    redeliver: bool,
    writes: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
            redeliver: false,
            writes: AtomicUsize::new(0),
        }
    }

    /// Каждое уведомление доставляется дважды
    pub fn with_redelivery() -> Self {
        Self {
            redeliver: true,
            ..Self::new()
        }
    }

    /// Пока недоступно, все операции падают с `StoreUnavailable`
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Число успешных изменяющих записей
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn candidates(&self, id: &CallId, collection: CandidateCollection) -> Vec<CandidateEntry> {
        self.calls
            .lock()
            .get_mut(id)
            .map(|record| record.entries(collection).clone())
            .unwrap_or_default()
    }

    fn ensure_available(&self) -> SignalingResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SignalingError::store("memory store is offline"))
        }
    }

    fn deliveries(&self) -> usize {
        if self.redeliver {
            2
        } else {
            1
        }
    }

    fn notify_call(&self, handlers: Vec<CallChangeHandler>, doc: CallDocument) {
        for _ in 0..self.deliveries() {
            for handler in &handlers {
                handler(doc.clone());
            }
        }
    }

    fn notify_candidates(&self, handlers: &[CandidateAddedHandler], entries: &[CandidateEntry]) {
        for _ in 0..self.deliveries() {
            for handler in handlers {
                for entry in entries {
                    handler(entry.clone());
                }
            }
        }
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_call(&self) -> SignalingResult<CallId> {
        self.ensure_available()?;
        let id = CallId::new(random_id());
        self.calls
            .lock()
            .insert(id.clone(), CallRecord::new(id.clone()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!("Created call document {}", id);
        Ok(id)
    }

    async fn get_call(&self, id: &CallId) -> SignalingResult<Option<CallDocument>> {
        self.ensure_available()?;
        Ok(self.calls.lock().get(id).map(|record| record.doc.clone()))
    }

    async fn update_call(&self, id: &CallId, update: CallUpdate) -> SignalingResult<()> {
        self.ensure_available()?;
        let (handlers, doc) = {
            let mut calls = self.calls.lock();
            let record = calls
                .get_mut(id)
                .ok_or_else(|| SignalingError::not_found(id.as_str()))?;
            if let Some(offer) = update.offer {
                record.doc.offer = Some(offer);
            }
            if let Some(answer) = update.answer {
                record.doc.answer = Some(answer);
            }
            (record.live_call_handlers(), record.doc.clone())
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!("Call {} updated, notifying {} listeners", id, handlers.len());
        self.notify_call(handlers, doc);
        Ok(())
    }

    async fn add_candidate(
        &self,
        id: &CallId,
        collection: CandidateCollection,
        candidate: IceCandidate,
    ) -> SignalingResult<CandidateEntry> {
        self.ensure_available()?;
        let entry = CandidateEntry {
            id: random_id(),
            candidate,
        };
        let handlers = {
            let mut calls = self.calls.lock();
            let record = calls
                .get_mut(id)
                .ok_or_else(|| SignalingError::not_found(id.as_str()))?;
            record.entries(collection).push(entry.clone());
            record.live_candidate_handlers(collection)
        };
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(
            "Appended candidate {} to {}/{}",
            entry.id,
            id,
            collection.as_str()
        );
        self.notify_candidates(&handlers, std::slice::from_ref(&entry));
        Ok(entry)
    }

    fn subscribe_call(
        &self,
        id: &CallId,
        handler: CallChangeHandler,
    ) -> SignalingResult<Subscription> {
        self.ensure_available()?;
        let (subscription, active) = Subscription::pair();
        let snapshot = {
            let mut calls = self.calls.lock();
            let record = calls
                .get_mut(id)
                .ok_or_else(|| SignalingError::not_found(id.as_str()))?;
            record.call_listeners.push(Listener {
                active,
                handler: Arc::clone(&handler),
            });
            record.doc.clone()
        };
        self.notify_call(vec![handler], snapshot);
        Ok(subscription)
    }

    fn subscribe_candidates(
        &self,
        id: &CallId,
        collection: CandidateCollection,
        handler: CandidateAddedHandler,
    ) -> SignalingResult<Subscription> {
        self.ensure_available()?;
        let (subscription, active) = Subscription::pair();
        let snapshot = {
            let mut calls = self.calls.lock();
            let record = calls
                .get_mut(id)
                .ok_or_else(|| SignalingError::not_found(id.as_str()))?;
            record.candidate_listeners(collection).push(Listener {
                active,
                handler: Arc::clone(&handler),
            });
            record.entries(collection).clone()
        };
        self.notify_candidates(&[handler], &snapshot);
        Ok(subscription)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::SessionDescription;

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate::new(
            format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 5000 typ host"),
            Some("0".into()),
            Some(0),
        )
    }

    fn collecting<T: Send + 'static>() -> (Arc<Mutex<Vec<T>>>, Arc<dyn Fn(T) + Send + Sync>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, Arc::new(move |item: T| sink.lock().push(item)))
    }

    #[tokio::test]
    async fn call_subscription_gets_snapshot_then_changes() {
        let store = MemoryStore::new();
        let id = store.create_call().await.unwrap();
        let (seen, handler) = collecting::<CallDocument>();

        let _sub = store.subscribe_call(&id, handler).unwrap();
        store
            .update_call(&id, CallUpdate::offer(SessionDescription::offer("A")))
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].offer.is_none());
        assert_eq!(seen[1].offer, Some(SessionDescription::offer("A")));
    }

    #[tokio::test]
    async fn candidate_subscription_replays_existing_entries() {
        let store = MemoryStore::new();
        let id = store.create_call().await.unwrap();
        let first = store
            .add_candidate(&id, CandidateCollection::OfferCandidates, candidate(1))
            .await
            .unwrap();

        let (seen, handler) = collecting::<CandidateEntry>();
        let _sub = store
            .subscribe_candidates(&id, CandidateCollection::OfferCandidates, handler)
            .unwrap();
        store
            .add_candidate(&id, CandidateCollection::OfferCandidates, candidate(2))
            .await
            .unwrap();
        store
            .add_candidate(&id, CandidateCollection::AnswerCandidates, candidate(3))
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], first);
        assert_eq!(seen[1].candidate, candidate(2));
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_delivery() {
        let store = MemoryStore::new();
        let id = store.create_call().await.unwrap();
        let (seen, handler) = collecting::<CallDocument>();

        let sub = store.subscribe_call(&id, handler).unwrap();
        sub.cancel();
        store
            .update_call(&id, CallUpdate::offer(SessionDescription::offer("A")))
            .await
            .unwrap();

        assert_eq!(seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn redelivery_doubles_notifications() {
        let store = MemoryStore::with_redelivery();
        let id = store.create_call().await.unwrap();
        let (seen, handler) = collecting::<CandidateEntry>();
        let _sub = store
            .subscribe_candidates(&id, CandidateCollection::AnswerCandidates, handler)
            .unwrap();

        store
            .add_candidate(&id, CandidateCollection::AnswerCandidates, candidate(1))
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
    }

    #[tokio::test]
    async fn offline_store_fails_without_writing() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.create_call().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.write_count(), 0);

        store.set_available(true);
        assert!(store.create_call().await.is_ok());
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn update_of_missing_call_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_call(&CallId::new("nope"), CallUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SignalingError::RecordNotFound { .. }));
    }
}
