//! Подставные реализации внешних зависимостей сессии.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use relaycall::peer::engine::{OnConnectionStateFn, OnLocalCandidateFn, OnTrackFn};
use relaycall::store::{CallChangeHandler, CallUpdate, CandidateAddedHandler};
use relaycall::{
    CallDocument, CallId, CallSession, CandidateCollection, CandidateEntry, CaptureEngine,
    Collaborators, ConnectionState, EngineFactory, IceCandidate, MediaConstraints, MediaStream,
    MediaTrack, MemoryStore, NegotiationEngine, OnChunkFn, RecordingOptions, SessionConfig,
    SessionDescription, SignalingError, SignalingResult, SignalingStore, Subscription, TrackKind,
    UploadPayload, UploadSink,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

pub fn candidate(host: u8) -> IceCandidate {
    IceCandidate::new(
        format!("candidate:{host} 1 udp 2122260223 192.168.0.{host} 5000{host} typ host"),
        Some("0".into()),
        Some(0),
    )
}

#[derive(Debug, Default)]
pub struct EngineLog {
    pub local: Option<SessionDescription>,
    pub remote: Option<SessionDescription>,
    pub remote_sets: usize,
    pub added: Vec<IceCandidate>,
    pub tracks: Vec<String>,
    pub closed: bool,
}

/// Движок по сценарию: отдаёт `sdp` как своё описание, шлёт
/// `local_candidates` при установке локального описания и один входящий
/// трек при установке удалённого.
pub struct FakeEngine {
    sdp: String,
    local_candidates: Vec<IceCandidate>,
    pub log: Mutex<EngineLog>,
    pub reject_remote: AtomicBool,
    on_candidate: Mutex<Option<OnLocalCandidateFn>>,
    on_track: Mutex<Option<OnTrackFn>>,
    on_state: Mutex<Option<OnConnectionStateFn>>,
}

impl FakeEngine {
    pub fn new(sdp: &str, local_candidates: Vec<IceCandidate>) -> Arc<Self> {
        Arc::new(Self {
            sdp: sdp.into(),
            local_candidates,
            log: Mutex::new(EngineLog::default()),
            reject_remote: AtomicBool::new(false),
            on_candidate: Mutex::new(None),
            on_track: Mutex::new(None),
            on_state: Mutex::new(None),
        })
    }

    pub fn added(&self) -> Vec<IceCandidate> {
        self.log.lock().added.clone()
    }

    pub fn remote(&self) -> Option<SessionDescription> {
        self.log.lock().remote.clone()
    }
}

#[async_trait]
impl NegotiationEngine for FakeEngine {
    async fn create_offer(&self) -> SignalingResult<SessionDescription> {
        Ok(SessionDescription::offer(self.sdp.clone()))
    }

    async fn create_answer(&self) -> SignalingResult<SessionDescription> {
        if self.log.lock().remote.is_none() {
            return Err(SignalingError::rejected("answer without remote offer"));
        }
        Ok(SessionDescription::answer(self.sdp.clone()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> SignalingResult<()> {
        self.log.lock().local = Some(desc);

        let handler = self.on_candidate.lock().take();
        if let Some(mut handler) = handler {
            for candidate in &self.local_candidates {
                handler(candidate.clone()).await;
            }
            *self.on_candidate.lock() = Some(handler);
        }
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalingResult<()> {
        if self.reject_remote.load(Ordering::SeqCst) {
            return Err(SignalingError::rejected("malformed remote description"));
        }
        {
            let mut log = self.log.lock();
            if log.remote.is_some() {
                return Err(SignalingError::rejected("remote description already set"));
            }
            log.remote = Some(desc);
            log.remote_sets += 1;
        }

        if let Some(on_track) = self.on_track.lock().as_ref() {
            on_track(MediaTrack::new(format!("{}-remote-video", self.sdp), TrackKind::Video));
        }
        if let Some(on_state) = self.on_state.lock().as_ref() {
            on_state(ConnectionState::Connecting);
        }
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalingResult<()> {
        let mut log = self.log.lock();
        if log.remote.is_none() {
            return Err(SignalingError::rejected("no remote description"));
        }
        log.added.push(candidate);
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack, _stream_id: &str) -> SignalingResult<()> {
        self.log.lock().tracks.push(track.id().to_owned());
        Ok(())
    }

    fn on_ice_candidate(&self, handler: OnLocalCandidateFn) {
        *self.on_candidate.lock() = Some(handler);
    }

    fn on_track(&self, handler: OnTrackFn) {
        *self.on_track.lock() = Some(handler);
    }

    fn on_connection_state_change(&self, handler: OnConnectionStateFn) {
        *self.on_state.lock() = Some(handler);
    }

    async fn close(&self) -> SignalingResult<()> {
        self.log.lock().closed = true;
        Ok(())
    }
}

/// Отдаёт `current`; движок из `push` заменяет его при следующем create
pub struct FakeFactory {
    current: Mutex<Arc<FakeEngine>>,
    queued: Mutex<VecDeque<Arc<FakeEngine>>>,
    pub created: AtomicUsize,
}

impl FakeFactory {
    pub fn push(&self, engine: Arc<FakeEngine>) {
        self.queued.lock().push_back(engine);
    }

    pub fn current(&self) -> Arc<FakeEngine> {
        self.current.lock().clone()
    }
}

#[async_trait]
impl EngineFactory for FakeFactory {
    async fn create(&self, _config: &SessionConfig) -> SignalingResult<Arc<dyn NegotiationEngine>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let mut current = self.current.lock();
        if let Some(next) = self.queued.lock().pop_front() {
            *current = next;
        }
        Ok(current.clone())
    }
}

/// Обёртка над `MemoryStore`; следующие `fail_updates` вызовов `update_call` падают
pub struct FlakyStore {
    inner: Arc<MemoryStore>,
    pub fail_updates: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: &Arc<MemoryStore>, fail_updates: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: inner.clone(),
            fail_updates: AtomicUsize::new(fail_updates),
        })
    }
}

#[async_trait]
impl SignalingStore for FlakyStore {
    async fn create_call(&self) -> SignalingResult<CallId> {
        self.inner.create_call().await
    }

    async fn get_call(&self, id: &CallId) -> SignalingResult<Option<CallDocument>> {
        self.inner.get_call(id).await
    }

    async fn update_call(&self, id: &CallId, update: CallUpdate) -> SignalingResult<()> {
        let failing = self
            .fail_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SignalingError::store("transient"));
        }
        self.inner.update_call(id, update).await
    }

    async fn add_candidate(
        &self,
        id: &CallId,
        collection: CandidateCollection,
        candidate: IceCandidate,
    ) -> SignalingResult<CandidateEntry> {
        self.inner.add_candidate(id, collection, candidate).await
    }

    fn subscribe_call(
        &self,
        id: &CallId,
        handler: CallChangeHandler,
    ) -> SignalingResult<Subscription> {
        self.inner.subscribe_call(id, handler)
    }

    fn subscribe_candidates(
        &self,
        id: &CallId,
        collection: CandidateCollection,
        handler: CandidateAddedHandler,
    ) -> SignalingResult<Subscription> {
        self.inner.subscribe_candidates(id, collection, handler)
    }
}

/// Отдаёт поток из двух треков; `stop_chunks` сбрасываются при остановке
pub struct FakeCapture {
    stop_chunks: Mutex<Vec<Bytes>>,
    on_chunk: Mutex<Option<OnChunkFn>>,
    pub fail_acquire: AtomicBool,
    pub stream: Mutex<Option<MediaStream>>,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stop_chunks: Mutex::new(Vec::new()),
            on_chunk: Mutex::new(None),
            fail_acquire: AtomicBool::new(false),
            stream: Mutex::new(None),
        })
    }

    pub fn flush_on_stop(&self, chunk: &'static [u8]) {
        self.stop_chunks.lock().push(Bytes::from_static(chunk));
    }

    pub fn emit(&self, chunk: &'static [u8]) {
        if let Some(on_chunk) = self.on_chunk.lock().as_ref() {
            on_chunk(Bytes::from_static(chunk));
        }
    }
}

#[async_trait]
impl CaptureEngine for FakeCapture {
    async fn acquire_local_stream(
        &self,
        constraints: &MediaConstraints,
    ) -> SignalingResult<MediaStream> {
        if self.fail_acquire.load(Ordering::SeqCst) {
            return Err(SignalingError::capture("camera permission denied"));
        }
        let mut stream = MediaStream::new("local");
        if constraints.audio {
            stream.add_track(MediaTrack::new("mic", TrackKind::Audio));
        }
        if constraints.video {
            stream.add_track(MediaTrack::new("cam", TrackKind::Video));
        }
        *self.stream.lock() = Some(stream.clone());
        Ok(stream)
    }

    async fn start_recording(
        &self,
        _stream: &MediaStream,
        _options: &RecordingOptions,
        on_chunk: OnChunkFn,
    ) -> SignalingResult<()> {
        *self.on_chunk.lock() = Some(on_chunk);
        Ok(())
    }

    async fn stop_recording(&self) -> SignalingResult<()> {
        let on_chunk = self.on_chunk.lock().take();
        if let Some(on_chunk) = on_chunk {
            for chunk in self.stop_chunks.lock().drain(..) {
                on_chunk(chunk);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingUploader {
    pub payloads: Mutex<Vec<UploadPayload>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl UploadSink for RecordingUploader {
    async fn upload(&self, payload: &UploadPayload) -> SignalingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SignalingError::upload("upload endpoint responded with 500"));
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }
}

pub struct Participant {
    pub session: CallSession,
    pub engine: Arc<FakeEngine>,
    pub factory: Arc<FakeFactory>,
    pub capture: Arc<FakeCapture>,
    pub uploader: Arc<RecordingUploader>,
}

pub fn participant(store: &Arc<MemoryStore>, sdp: &str, candidates: Vec<IceCandidate>) -> Participant {
    participant_on(store.clone(), sdp, candidates)
}

pub fn participant_on(
    store: Arc<dyn SignalingStore>,
    sdp: &str,
    candidates: Vec<IceCandidate>,
) -> Participant {
    let engine = FakeEngine::new(sdp, candidates);
    let factory = Arc::new(FakeFactory {
        current: Mutex::new(engine.clone()),
        queued: Mutex::new(VecDeque::new()),
        created: AtomicUsize::new(0),
    });
    let capture = FakeCapture::new();
    let uploader = Arc::new(RecordingUploader::default());
    let session = CallSession::new(
        SessionConfig::default(),
        Collaborators {
            store,
            engines: factory.clone(),
            capture: capture.clone(),
            uploader: uploader.clone(),
        },
    );
    Participant {
        session,
        engine,
        factory,
        capture,
        uploader,
    }
}
