//! Сигнализация звонка двух участников через общее хранилище документов.
//!
//! Вызывающий публикует offer в запись звонка, вызываемый подключается по id
//! и пишет answer; затем обе стороны шлют ICE-кандидаты через коллекции
//! только-на-добавление. См. [`CallSession`].

pub mod config;
pub mod error;
pub mod logger;
pub mod media;
pub mod peer;
pub mod recorder;
pub mod session;
pub mod signaling;
pub mod store;
pub mod upload;
pub mod utils;

pub use config::{ServerConfig, SessionConfig};
pub use error::{SignalingError, SignalingResult};
pub use media::{CaptureEngine, MediaConstraints, OnChunkFn, RecordingOptions};
pub use peer::{
    CallDocument, CallId, CandidateCollection, CandidateEntry, ConnectionState, EngineFactory,
    IceCandidate, MediaStream, MediaTrack, NegotiationEngine, Role, SdpType, SessionDescription,
    TrackKind, WebrtcEngine, WebrtcEngineFactory,
};
pub use recorder::{Recording, SessionRecorder};
pub use session::{CallSession, Collaborators, HangupReport, SessionEvent, SignalingState};
pub use store::{MemoryStore, SignalingStore, Subscription};
pub use upload::{HttpUploadSink, UploadPayload, UploadSink};
