use crate::config::{ServerConfig, SessionConfig};
use crate::error::{SignalingError, SignalingResult};
use crate::logger::dump_candidate;
use crate::peer::engine::{
    EngineFactory, NegotiationEngine, OnConnectionStateFn, OnLocalCandidateFn, OnTrackFn,
};
use crate::peer::types::{
    ConnectionState, IceCandidate, MediaTrack, SdpType, SessionDescription, TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// Движок согласования поверх webrtc-rs; один экземпляр на звонок
pub struct WebrtcEngine {
    pc: Arc<RTCPeerConnection>,
    outbound: Mutex<HashMap<String, Arc<TrackLocalStaticSample>>>,
}

impl WebrtcEngine {
    /// создаём Peer с кодеками по умолчанию и ICE серверами из конфигурации
    pub async fn new(config: &SessionConfig) -> SignalingResult<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(config)).await?);

        // Добавляем обработчик ICE gathering state для отладки
        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        Ok(Self {
            pc,
            outbound: Mutex::new(HashMap::new()),
        })
    }

    /// Исходящий трек, в который бэкенд захвата пишет сэмплы
    pub fn outbound_track(&self, track_id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.outbound.lock().get(track_id).cloned()
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.pc
    }
}

#[async_trait]
impl NegotiationEngine for WebrtcEngine {
    async fn create_offer(&self) -> SignalingResult<SessionDescription> {
        let offer = self.pc.create_offer(None).await?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> SignalingResult<SessionDescription> {
        let answer = self.pc.create_answer(None).await?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> SignalingResult<()> {
        self.pc.set_local_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> SignalingResult<()> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> SignalingResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack, stream_id: &str) -> SignalingResult<()> {
        let mime_type = match track.kind() {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id().to_owned(),
            stream_id.to_owned(),
        ));

        self.pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;
        self.outbound.lock().insert(track.id().to_owned(), local);
        debug!("Added outbound {:?} track {}", track.kind(), track.id());
        Ok(())
    }

    fn on_ice_candidate(&self, mut handler: OnLocalCandidateFn) {
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                let Some(c) = cand else {
                    // cand == None означает конец сбора
                    debug!("ICE candidate gathering completed (null candidate received)");
                    return Box::pin(async {});
                };
                match c.to_json() {
                    Ok(init) => {
                        let candidate = IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_mline_index: init.sdp_mline_index,
                            username_fragment: init.username_fragment,
                        };
                        dump_candidate("LOCAL", &candidate);
                        handler(candidate)
                    }
                    Err(e) => {
                        warn!("Failed to serialize local candidate: {:?}", e);
                        Box::pin(async {})
                    }
                }
            }));
    }

    fn on_track(&self, handler: OnTrackFn) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    RTPCodecType::Video => TrackKind::Video,
                    other => {
                        warn!("Ignoring inbound track of kind {:?}", other);
                        return Box::pin(async {});
                    }
                };
                info!("Inbound {:?} track {}", kind, track.id());
                handler(MediaTrack::new(track.id(), kind));
                Box::pin(async {})
            },
        ));
    }

    fn on_connection_state_change(&self, handler: OnConnectionStateFn) {
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                info!("Peer connection state changed to: {:?}", st);
                let state = match st {
                    RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
                    RTCPeerConnectionState::Connected => ConnectionState::Connected,
                    RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
                    RTCPeerConnectionState::Failed => ConnectionState::Failed,
                    RTCPeerConnectionState::Closed => ConnectionState::Closed,
                    _ => ConnectionState::New,
                };
                handler(state);
                Box::pin(async {})
            }));
    }

    async fn close(&self) -> SignalingResult<()> {
        self.outbound.lock().clear();
        self.pc.close().await?;
        Ok(())
    }
}

/// Фабрика по умолчанию: новый `RTCPeerConnection` на каждый звонок
#[derive(Debug, Default, Clone, Copy)]
pub struct WebrtcEngineFactory;

#[async_trait]
impl EngineFactory for WebrtcEngineFactory {
    async fn create(&self, config: &SessionConfig) -> SignalingResult<Arc<dyn NegotiationEngine>> {
        Ok(Arc::new(WebrtcEngine::new(config).await?))
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(config: &SessionConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(&config.ice_servers),
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Конфигурация серверов в формате webrtc-rs
pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc_description(desc: SessionDescription) -> SignalingResult<RTCSessionDescription> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp)?,
    };
    Ok(rtc)
}

fn from_rtc_description(desc: RTCSessionDescription) -> SignalingResult<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(SignalingError::rejected(format!(
            "unsupported description type {other}"
        ))),
    }
}
