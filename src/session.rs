//! Машина состояний сигнализации для одного участника.
//!
//! ```text
//! Idle -> MediaReady -> Offering  -> Connected -> Ended
//!                    \-> Answering -/
//! ```
//!
//! Всё продвижение идёт через `&mut self`: действия пользователя это методы,
//! а уведомления хранилища и колбэки движка кладутся в очередь с одним
//! потребителем, которую владелец разбирает через [`CallSession::process_pending`]
//! или [`CallSession::next_event`]. Из колбэков локальное состояние не трогаем.

use crate::config::SessionConfig;
use crate::error::{SignalingError, SignalingResult};
use crate::logger;
use crate::media::CaptureEngine;
use crate::peer::connection::WebrtcEngineFactory;
use crate::peer::engine::{EngineFactory, NegotiationEngine};
use crate::peer::ice::{self, Admission, CandidateSink, RemoteCandidates};
use crate::peer::types::{
    CallDocument, CallId, CandidateEntry, ConnectionState, MediaStream, MediaTrack, Role,
    SessionDescription,
};
use crate::recorder::{Recording, SessionRecorder};
use crate::signaling;
use crate::store::{CallChangeHandler, CandidateAddedHandler, SignalingStore, Subscription};
use crate::upload::{HttpUploadSink, UploadSink};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SignalingState {
    #[default]
    Idle,
    MediaReady,
    Offering,
    Answering,
    Connected,
    Ended,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Idle => "idle",
            SignalingState::MediaReady => "media-ready",
            SignalingState::Offering => "offering",
            SignalingState::Answering => "answering",
            SignalingState::Connected => "connected",
            SignalingState::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Входные события машины состояний
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Снимок документа звонка из хранилища
    CallChanged(CallDocument),
    /// Запись в коллекции кандидатов другой стороны
    RemoteCandidate { call_id: CallId, entry: CandidateEntry },
    /// Входящий трек от движка
    RemoteTrack(MediaTrack),
    ConnectionState(ConnectionState),
}

/// Внешние зависимости сессии
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn SignalingStore>,
    pub engines: Arc<dyn EngineFactory>,
    pub capture: Arc<dyn CaptureEngine>,
    pub uploader: Arc<dyn UploadSink>,
}

/// Итог hangup. Сам hangup не падает.
#[derive(Debug, Default)]
pub struct HangupReport {
    /// Есть, если запись была запущена
    pub recording: Option<Recording>,
    /// Заполнено, если загрузка не удалась
    pub upload_error: Option<SignalingError>,
}

/// Join, у которого движок уже принял offer и answer, но запись в хранилище
/// не прошла. Повтор для того же звонка начинается с записи answer.
struct PendingJoin {
    call_id: CallId,
    offer: SessionDescription,
    answer: SessionDescription,
    sink: CandidateSink,
}

pub struct CallSession {
    config: SessionConfig,
    store: Arc<dyn SignalingStore>,
    engines: Arc<dyn EngineFactory>,
    capture: Arc<dyn CaptureEngine>,
    uploader: Arc<dyn UploadSink>,

    state: SignalingState,
    role: Option<Role>,
    call_id: Option<CallId>,
    engine: Option<Arc<dyn NegotiationEngine>>,
    connection_state: ConnectionState,

    local_stream: Option<MediaStream>,
    remote_stream: MediaStream,
    recorder: Option<SessionRecorder>,

    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    remote_candidates: RemoteCandidates,
    sink: Option<CandidateSink>,
    subscriptions: Vec<Subscription>,
    pending_join: Option<PendingJoin>,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl CallSession {
    pub fn new(config: SessionConfig, collaborators: Collaborators) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            store: collaborators.store,
            engines: collaborators.engines,
            capture: collaborators.capture,
            uploader: collaborators.uploader,
            state: SignalingState::Idle,
            role: None,
            call_id: None,
            engine: None,
            connection_state: ConnectionState::New,
            local_stream: None,
            remote_stream: MediaStream::new("remote"),
            recorder: None,
            local_description: None,
            remote_description: None,
            remote_candidates: RemoteCandidates::new(),
            sink: None,
            subscriptions: Vec::new(),
            pending_join: None,
            events_tx,
            events_rx,
        }
    }

    /// Движок webrtc-rs и HTTP-загрузка на `config.upload_url`
    pub fn with_webrtc(
        config: SessionConfig,
        store: Arc<dyn SignalingStore>,
        capture: Arc<dyn CaptureEngine>,
    ) -> Self {
        let uploader = Arc::new(HttpUploadSink::new(config.upload_url.clone()));
        Self::new(
            config,
            Collaborators {
                store,
                engines: Arc::new(WebrtcEngineFactory),
                capture,
                uploader,
            },
        )
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn call_id(&self) -> Option<&CallId> {
        self.call_id.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn local_stream(&self) -> Option<&MediaStream> {
        self.local_stream.as_ref()
    }

    pub fn remote_stream(&self) -> &MediaStream {
        &self.remote_stream
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    /// Удалённые кандидаты, ждущие remote description
    pub fn pending_remote_candidates(&self) -> usize {
        self.remote_candidates.pending_len()
    }

    // ========== ACTIONS ==========

    /// Idle -> MediaReady: захват локального медиа, движок, запуск записи
    pub async fn start_media(&mut self) -> SignalingResult<()> {
        self.require(SignalingState::Idle, "start media")?;

        let stream = self.capture.acquire_local_stream(&self.config.media).await?;
        let engine = match self.engines.create(&self.config).await {
            Ok(engine) => engine,
            Err(e) => {
                stream.stop_all_tracks();
                return Err(e);
            }
        };

        let bound = match self.bind_engine(engine.as_ref(), &stream).await {
            Ok(()) => {
                SessionRecorder::start(
                    self.capture.as_ref(),
                    &stream,
                    self.config.recording.clone(),
                )
                .await
            }
            Err(e) => Err(e),
        };
        let recorder = match bound {
            Ok(recorder) => recorder,
            Err(e) => {
                stream.stop_all_tracks();
                close_engine(engine.as_ref()).await;
                return Err(e);
            }
        };

        info!(
            "Local media ready: {} tracks on stream {}",
            stream.tracks().len(),
            stream.id()
        );
        self.engine = Some(engine);
        self.local_stream = Some(stream);
        self.recorder = Some(recorder);
        self.transition(SignalingState::MediaReady);
        Ok(())
    }

    /// MediaReady -> Offering: создаём запись звонка и публикуем offer.
    /// Возвращает id, который нужен вызываемому.
    pub async fn create_call(&mut self) -> SignalingResult<CallId> {
        self.require(SignalingState::MediaReady, "create a call")?;
        let engine = self.engine()?;

        let id = signaling::create_call(self.store.as_ref()).await?;
        let sink = CandidateSink::new(Arc::clone(&self.store), id.clone(), Role::Caller);

        let (offer, subscriptions) = match self.publish_offer(engine.as_ref(), &id, &sink).await {
            Ok(published) => published,
            Err(e) => {
                sink.close();
                return Err(e);
            }
        };

        self.role = Some(Role::Caller);
        self.call_id = Some(id.clone());
        self.sink = Some(sink);
        self.subscriptions = subscriptions;
        self.local_description = Some(offer);
        self.transition(SignalingState::Offering);
        Ok(id)
    }

    /// MediaReady -> Answering -> Connected: подключение к звонку `input`.
    ///
    /// Если предыдущая попытка для того же звонка упала на записи в
    /// хранилище, движок повторно не трогаем: дописываем answer и
    /// подписываемся. Попытка для другого звонка получает новый движок.
    pub async fn join_call(&mut self, input: &str) -> SignalingResult<()> {
        self.require(SignalingState::MediaReady, "join a call")?;

        let id = CallId::from_user_input(input);
        info!("Joining call {} ...", id);
        let call = signaling::get_call(self.store.as_ref(), &id).await?;
        let offer = call.offer.clone().ok_or_else(|| SignalingError::MissingOffer {
            call_id: id.to_string(),
        })?;

        let resumed = match self.pending_join.take() {
            Some(pending) if pending.call_id == id && pending.offer == offer => Some(pending),
            Some(stale) => {
                debug!("Dropping unfinished join of call {}", stale.call_id);
                if let Err(e) = self.rebuild_engine().await {
                    self.pending_join = Some(stale);
                    return Err(e);
                }
                stale.sink.close();
                None
            }
            None => None,
        };

        let engine = self.engine()?;
        let (answer, sink) = match resumed {
            Some(pending) => {
                info!("Resuming join of call {}, answer already applied", id);
                (pending.answer, pending.sink)
            }
            None => {
                let sink = CandidateSink::new(Arc::clone(&self.store), id.clone(), Role::Callee);
                match negotiate_answer(engine.as_ref(), offer.clone(), &sink).await {
                    Ok(answer) => (answer, sink),
                    Err(e) => {
                        sink.close();
                        // движок мог успеть принять offer
                        if let Err(rebuild) = self.rebuild_engine().await {
                            warn!("Failed to replace negotiation engine: {}", rebuild);
                        }
                        return Err(e);
                    }
                }
            }
        };

        let answered = call.answer.as_ref() == Some(&answer);
        let subscriptions = match self.publish_answer(&id, &answer, answered).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                self.pending_join = Some(PendingJoin {
                    call_id: id,
                    offer,
                    answer,
                    sink,
                });
                return Err(e);
            }
        };

        self.role = Some(Role::Callee);
        self.call_id = Some(id);
        self.sink = Some(sink);
        self.subscriptions = subscriptions;
        self.local_description = Some(answer);
        self.remote_description = Some(offer);
        self.transition(SignalingState::Answering);
        self.remote_applied().await;
        Ok(())
    }

    /// Любое состояние -> Ended. Останавливает медиа, снимает сигнализацию,
    /// собирает и загружает запись. Повторный вызов ничего не делает.
    pub async fn hangup(&mut self) -> HangupReport {
        let mut report = HangupReport::default();
        if self.state == SignalingState::Ended {
            return report;
        }
        info!("Hanging up the call ...");

        for subscription in self.subscriptions.drain(..) {
            subscription.cancel();
        }
        if let Some(pending) = self.pending_join.take() {
            pending.sink.close();
        }
        if let Some(sink) = self.sink.take() {
            sink.close();
            logger::analyze_candidates(&sink.forwarded());
        }

        if let Some(stream) = &self.local_stream {
            stream.stop_all_tracks();
        }
        self.remote_stream.stop_all_tracks();

        if let Some(engine) = self.engine.take() {
            close_engine(engine.as_ref()).await;
        }

        if let Some(recorder) = self.recorder.take() {
            let recording = recorder.finalize(self.capture.as_ref()).await;
            if let Err(e) = self.uploader.upload(&recording.upload_payload()).await {
                warn!("Recording upload failed: {}", e);
                report.upload_error = Some(match e {
                    e @ SignalingError::UploadFailed { .. } => e,
                    other => SignalingError::upload(other.to_string()),
                });
            }
            report.recording = Some(recording);
        }

        self.remote_candidates.clear();
        while self.events_rx.try_recv().is_ok() {}
        self.transition(SignalingState::Ended);
        report
    }

    // ========== EVENTS ==========

    /// Обрабатывает всё, что уже в очереди, без ожидания. Ошибки логируются;
    /// возвращает число снятых с очереди событий.
    pub async fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            if let Err(e) = self.handle_event(event).await {
                warn!("Failed to handle session event: {}", e);
            }
            handled += 1;
        }
        handled
    }

    /// Ждёт следующее событие. Сессия сама держит отправителя, поэтому
    /// `None` бывает только если очередь закрыли снаружи.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events_rx.recv().await
    }

    pub async fn handle_event(&mut self, event: SessionEvent) -> SignalingResult<()> {
        if self.state == SignalingState::Ended {
            debug!("Session ended, ignoring late event {:?}", event);
            return Ok(());
        }

        match event {
            SessionEvent::CallChanged(doc) => self.on_call_changed(doc).await,
            SessionEvent::RemoteCandidate { call_id, entry } => {
                self.on_remote_candidate(call_id, entry).await
            }
            SessionEvent::RemoteTrack(track) => {
                let id = track.id().to_owned();
                if self.remote_stream.add_track(track) {
                    info!("Remote track {} added to remote stream", id);
                }
                Ok(())
            }
            SessionEvent::ConnectionState(state) => {
                debug!("Connection state {:?} -> {:?}", self.connection_state, state);
                self.connection_state = state;
                Ok(())
            }
        }
    }

    async fn on_call_changed(&mut self, doc: CallDocument) -> SignalingResult<()> {
        if self.role != Some(Role::Caller) || self.call_id.as_ref() != Some(&doc.id) {
            return Ok(());
        }
        if self.remote_description.is_some() {
            return Ok(());
        }
        let Some(answer) = doc.answer else {
            return Ok(());
        };

        info!("Answer received for call {}", doc.id);
        let engine = self.engine()?;
        engine.set_remote_description(answer.clone()).await?;
        self.remote_description = Some(answer);
        self.remote_applied().await;
        Ok(())
    }

    async fn on_remote_candidate(
        &mut self,
        call_id: CallId,
        entry: CandidateEntry,
    ) -> SignalingResult<()> {
        if self.call_id.as_ref() != Some(&call_id) {
            return Ok(());
        }
        let engine = self.engine()?;
        let entry_id = entry.id.clone();
        match self
            .remote_candidates
            .admit(entry, self.remote_description.is_some())
        {
            Admission::Duplicate => {
                debug!("Candidate {} already handled", entry_id);
                Ok(())
            }
            Admission::Deferred => {
                debug!(
                    "Remote description not set yet, queuing candidate {}",
                    entry_id
                );
                Ok(())
            }
            Admission::Apply(candidate) => ice::apply_candidate(engine.as_ref(), candidate).await,
        }
    }

    // ========== INTERNALS ==========

    /// Локальные треки в движок, колбэки движка в очередь событий
    async fn bind_engine(
        &self,
        engine: &dyn NegotiationEngine,
        stream: &MediaStream,
    ) -> SignalingResult<()> {
        for track in stream.tracks() {
            engine.add_track(track, stream.id()).await?;
        }

        let tx = self.events_tx.clone();
        engine.on_track(Box::new(move |track: MediaTrack| {
            let _ = tx.send(SessionEvent::RemoteTrack(track));
        }));
        let tx = self.events_tx.clone();
        engine.on_connection_state_change(Box::new(move |state: ConnectionState| {
            let _ = tx.send(SessionEvent::ConnectionState(state));
        }));
        Ok(())
    }

    /// Заменяет движок свежим из фабрики; старый закрывается
    async fn rebuild_engine(&mut self) -> SignalingResult<()> {
        let stream = self
            .local_stream
            .clone()
            .ok_or(SignalingError::InvalidState {
                action: "rebuild the engine",
                state: self.state,
            })?;
        let engine = self.engines.create(&self.config).await?;
        if let Err(e) = self.bind_engine(engine.as_ref(), &stream).await {
            close_engine(engine.as_ref()).await;
            return Err(e);
        }
        if let Some(old) = self.engine.replace(engine) {
            close_engine(old.as_ref()).await;
        }
        debug!("Negotiation engine replaced");
        Ok(())
    }

    async fn publish_offer(
        &self,
        engine: &dyn NegotiationEngine,
        id: &CallId,
        sink: &CandidateSink,
    ) -> SignalingResult<(SessionDescription, Vec<Subscription>)> {
        engine.on_ice_candidate(sink.handler());

        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;
        signaling::write_offer(self.store.as_ref(), id, offer.clone()).await?;

        // Ждём answer от удалённой стороны
        let call = signaling::subscribe_to_call(self.store.as_ref(), id, self.call_handler())?;
        let candidates = signaling::subscribe_to_candidates(
            self.store.as_ref(),
            id,
            Role::Caller.remote_candidates(),
            self.candidate_handler(id.clone()),
        )?;
        Ok((offer, vec![call, candidates]))
    }

    /// Запись answer (если его ещё нет в документе) и подписка на кандидаты
    async fn publish_answer(
        &self,
        id: &CallId,
        answer: &SessionDescription,
        already_written: bool,
    ) -> SignalingResult<Vec<Subscription>> {
        if !already_written {
            signaling::write_answer(self.store.as_ref(), id, answer.clone()).await?;
        }

        let candidates = signaling::subscribe_to_candidates(
            self.store.as_ref(),
            id,
            Role::Callee.remote_candidates(),
            self.candidate_handler(id.clone()),
        )?;
        Ok(vec![candidates])
    }

    /// Remote description установлен: применяем ранние кандидаты
    async fn remote_applied(&mut self) {
        if let Some(engine) = self.engine.clone() {
            let pending = self.remote_candidates.pending_len();
            if pending > 0 {
                let applied =
                    ice::apply_pending_candidates(engine.as_ref(), &mut self.remote_candidates)
                        .await;
                debug!("Applied {}/{} pending candidates", applied, pending);
            }
        }
        self.transition(SignalingState::Connected);
    }

    fn call_handler(&self) -> CallChangeHandler {
        let tx = self.events_tx.clone();
        Arc::new(move |doc: CallDocument| {
            let _ = tx.send(SessionEvent::CallChanged(doc));
        })
    }

    fn candidate_handler(&self, call_id: CallId) -> CandidateAddedHandler {
        let tx = self.events_tx.clone();
        Arc::new(move |entry: CandidateEntry| {
            let _ = tx.send(SessionEvent::RemoteCandidate {
                call_id: call_id.clone(),
                entry,
            });
        })
    }

    fn engine(&self) -> SignalingResult<Arc<dyn NegotiationEngine>> {
        self.engine
            .clone()
            .ok_or(SignalingError::InvalidState {
                action: "negotiate",
                state: self.state,
            })
    }

    fn require(&self, expected: SignalingState, action: &'static str) -> SignalingResult<()> {
        if self.state != expected {
            return Err(SignalingError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    fn transition(&mut self, next: SignalingState) {
        info!("Signaling state {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Offer в движок, answer из движка; локальные кандидаты идут в `sink`
async fn negotiate_answer(
    engine: &dyn NegotiationEngine,
    offer: SessionDescription,
    sink: &CandidateSink,
) -> SignalingResult<SessionDescription> {
    engine.on_ice_candidate(sink.handler());

    engine.set_remote_description(offer).await?;
    let answer = engine.create_answer().await?;
    engine.set_local_description(answer.clone()).await?;
    Ok(answer)
}

async fn close_engine(engine: &dyn NegotiationEngine) {
    if let Err(e) = engine.close().await {
        warn!("Failed to close negotiation engine: {}", e);
    }
}
