use crate::error::SignalingResult;
use crate::logger::dump_candidate;
use crate::peer::engine::{NegotiationEngine, OnLocalCandidateFn};
use crate::peer::types::{CallId, CandidateEntry, IceCandidate, Role};
use crate::signaling;
use crate::store::SignalingStore;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Пересылает локальные кандидаты в коллекцию своей стороны.
///
/// Без буферизации: каждый кандидат уходит отдельной записью.
#[derive(Clone)]
pub struct CandidateSink {
    store: Arc<dyn SignalingStore>,
    call_id: CallId,
    role: Role,
    closed: Arc<AtomicBool>,
    forwarded: Arc<Mutex<Vec<IceCandidate>>>,
}

impl CandidateSink {
    pub fn new(store: Arc<dyn SignalingStore>, call_id: CallId, role: Role) -> Self {
        Self {
            store,
            call_id,
            role,
            closed: Arc::new(AtomicBool::new(false)),
            forwarded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Записывает кандидат в хранилище; после `close()` ничего не делает
    pub async fn forward(&self, candidate: IceCandidate) -> SignalingResult<()> {
        if self.is_closed() {
            debug!("Sink closed, dropping local candidate");
            return Ok(());
        }
        signaling::append_candidate(self.store.as_ref(), &self.call_id, self.role, candidate.clone())
            .await?;
        self.forwarded.lock().push(candidate);
        Ok(())
    }

    /// Обработчик для `NegotiationEngine::on_ice_candidate`.
    /// Ошибки хранилища только логируются.
    pub fn handler(&self) -> OnLocalCandidateFn {
        let sink = self.clone();
        Box::new(move |candidate: IceCandidate| {
            let sink = sink.clone();
            Box::pin(async move {
                if let Err(e) = sink.forward(candidate).await {
                    warn!(
                        "Failed to store local candidate for {} ({}): {}",
                        sink.call_id, sink.role, e
                    );
                }
            })
        })
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Кандидаты, успешно записанные в хранилище
    pub fn forwarded(&self) -> Vec<IceCandidate> {
        self.forwarded.lock().clone()
    }
}

/// Что делать с пришедшим удалённым кандидатом
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Уже видели этот entry id
    Duplicate,
    /// Remote description ещё не установлен, кандидат отложен
    Deferred,
    /// Можно применять сразу
    Apply(IceCandidate),
}

/// Защита от повторной доставки и очередь кандидатов,
/// полученных до установки remote description
#[derive(Debug, Default)]
pub struct RemoteCandidates {
    seen: HashSet<String>,
    pending: Vec<IceCandidate>,
}

impl RemoteCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&mut self, entry: CandidateEntry, remote_applied: bool) -> Admission {
        if !self.seen.insert(entry.id) {
            return Admission::Duplicate;
        }
        if remote_applied {
            Admission::Apply(entry.candidate)
        } else {
            self.pending.push(entry.candidate);
            Admission::Deferred
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    pub fn take_pending(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending)
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.pending.clear();
    }
}

/// Применяет удалённый кандидат; отказ движка логируется и возвращается
pub async fn apply_candidate(
    engine: &dyn NegotiationEngine,
    candidate: IceCandidate,
) -> SignalingResult<()> {
    dump_candidate("REMOTE", &candidate);
    if let Err(e) = engine.add_ice_candidate(candidate).await {
        warn!("Failed to add ICE candidate: {}", e);
        return Err(e);
    }
    Ok(())
}

/// Применяет все отложенные кандидаты после установки remote description
pub async fn apply_pending_candidates(engine: &dyn NegotiationEngine, queue: &mut RemoteCandidates) -> usize {
    let candidates = queue.take_pending();
    let mut applied = 0;
    for candidate in candidates {
        debug!("Applying pending candidate: {}", candidate.candidate);
        if apply_candidate(engine, candidate).await.is_ok() {
            applied += 1;
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::types::CandidateCollection;
    use crate::store::MemoryStore;

    fn entry(id: &str) -> CandidateEntry {
        CandidateEntry {
            id: id.into(),
            candidate: IceCandidate::new(format!("candidate:{id}"), Some("0".into()), Some(0)),
        }
    }

    #[test]
    fn duplicates_are_admitted_once() {
        let mut queue = RemoteCandidates::new();
        assert!(matches!(queue.admit(entry("a"), true), Admission::Apply(_)));
        assert_eq!(queue.admit(entry("a"), true), Admission::Duplicate);
        assert_eq!(queue.admit(entry("a"), false), Admission::Duplicate);
        assert_eq!(queue.seen_len(), 1);
    }

    #[test]
    fn early_candidates_wait_in_arrival_order() {
        let mut queue = RemoteCandidates::new();
        assert_eq!(queue.admit(entry("b"), false), Admission::Deferred);
        assert_eq!(queue.admit(entry("a"), false), Admission::Deferred);
        assert_eq!(queue.admit(entry("b"), false), Admission::Duplicate);

        let pending = queue.take_pending();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].candidate, "candidate:b");
        assert_eq!(queue.pending_len(), 0);
    }

    #[tokio::test]
    async fn sink_appends_to_own_collection_until_closed() {
        let store = Arc::new(MemoryStore::new());
        let id = store.create_call().await.unwrap();
        let sink = CandidateSink::new(store.clone(), id.clone(), Role::Callee);

        let mut handler = sink.handler();
        handler(entry("x").candidate).await;
        sink.close();
        handler(entry("y").candidate).await;

        let stored = store.candidates(&id, CandidateCollection::AnswerCandidates);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].candidate.candidate, "candidate:x");
        assert!(store
            .candidates(&id, CandidateCollection::OfferCandidates)
            .is_empty());
        assert_eq!(sink.forwarded().len(), 1);
    }

    #[tokio::test]
    async fn sink_swallows_store_errors() {
        let store = Arc::new(MemoryStore::new());
        let id = store.create_call().await.unwrap();
        let sink = CandidateSink::new(store.clone(), id, Role::Caller);
        store.set_available(false);

        (sink.handler())(entry("x").candidate).await;
        assert!(sink.forwarded().is_empty());
    }
}
