use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Идентификатор звонка (документа в хранилище)
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id, введённый пользователем вручную; пробелы по краям отбрасываются
    pub fn from_user_input(input: &str) -> Self {
        Self(input.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => f.write_str("offer"),
            SdpType::Answer => f.write_str("answer"),
        }
    }
}

/// `{ type, sdp }`, неизменяем после записи
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE кандидат в форме `RTCIceCandidate.toJSON()`; хранится и читается как есть
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>, sdp_mid: Option<String>, sdp_mline_index: Option<u16>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid,
            sdp_mline_index,
            username_fragment: None,
        }
    }

    /// host / srflx / prflx / relay, если указан `typ`
    pub fn kind(&self) -> Option<&str> {
        let mut parts = self.candidate.split_whitespace();
        while let Some(part) = parts.next() {
            if part == "typ" {
                return parts.next();
            }
        }
        None
    }
}

/// Сторона звонка
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caller,
    Callee,
}

impl Role {
    /// Коллекция, в которую пишет эта сторона
    pub fn own_candidates(self) -> CandidateCollection {
        match self {
            Role::Caller => CandidateCollection::OfferCandidates,
            Role::Callee => CandidateCollection::AnswerCandidates,
        }
    }

    /// Коллекция, которую эта сторона читает
    pub fn remote_candidates(self) -> CandidateCollection {
        match self {
            Role::Caller => CandidateCollection::AnswerCandidates,
            Role::Callee => CandidateCollection::OfferCandidates,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Caller => f.write_str("caller"),
            Role::Callee => f.write_str("callee"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CandidateCollection {
    #[serde(rename = "offerCandidates")]
    OfferCandidates,
    #[serde(rename = "answerCandidates")]
    AnswerCandidates,
}

impl CandidateCollection {
    pub fn as_str(self) -> &'static str {
        match self {
            CandidateCollection::OfferCandidates => "offerCandidates",
            CandidateCollection::AnswerCandidates => "answerCandidates",
        }
    }
}

/// Документ звонка: `{ id, offer?, answer? }`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CallDocument {
    pub id: CallId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
}

impl CallDocument {
    pub fn empty(id: CallId) -> Self {
        Self {
            id,
            offer: None,
            answer: None,
        }
    }
}

/// Кандидат в одной из подколлекций вместе с id, выданным хранилищем
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidateEntry {
    pub id: String,
    pub candidate: IceCandidate,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Дескриптор локального или удалённого трека.
///
/// Клоны делят один флаг активности: остановка любого клона останавливает
/// трек у всех владельцев.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: id.into(),
            kind,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn stop(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// false, если трек с таким id уже есть
    pub fn add_track(&mut self, track: MediaTrack) -> bool {
        if self.tracks.iter().any(|t| t.id == track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    /// Можно вызывать на пустом или уже остановленном потоке
    pub fn stop_all_tracks(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Состояние соединения по данным движка
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}
