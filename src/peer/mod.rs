pub mod connection;
pub mod engine;
pub mod ice;
pub mod types;

pub use connection::{WebrtcEngine, WebrtcEngineFactory};
pub use engine::{EngineFactory, NegotiationEngine};
pub use ice::{CandidateSink, RemoteCandidates};
pub use types::{
    CallDocument, CallId, CandidateCollection, CandidateEntry, ConnectionState, IceCandidate,
    MediaStream, MediaTrack, Role, SdpType, SessionDescription, TrackKind,
};
