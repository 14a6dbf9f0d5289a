//! Media transport over the `webrtc` crate.
//!
//! One `RTCPeerConnection` per session. Local capture tracks become
//! [`TrackLocalStaticSample`]s shared by every connection that mirrors them;
//! the capture pipeline looks them up by track id and writes samples in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use spinshare_common::{IceCandidate, SdpKind, SessionDescription};
use spinshare_config::schema::IceConfig;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::error::TransportError;
use crate::media::{MediaTrack, RemoteTrack, TrackId, TrackKind};
use crate::transport::{ConnectivityState, PeerTransport, TransportEventSink, TransportFactory};

/// Stream id the local tracks are grouped under on the wire.
const LOCAL_STREAM_ID: &str = "spinshare-screen";

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct WebRtcTransportFactory {
    api: API,
    ice_servers: Vec<RTCIceServer>,
    samples: Arc<Mutex<HashMap<TrackId, Arc<TrackLocalStaticSample>>>>,
}

impl WebRtcTransportFactory {
    pub fn new(ice: &IceConfig) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| TransportError::Create(e.to_string()))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| TransportError::Create(e.to_string()))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self {
            api,
            ice_servers: ice_servers(ice),
            samples: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The sample sink behind a local track, once a session has mirrored it.
    pub fn sample_track(&self, id: &TrackId) -> Option<Arc<TrackLocalStaticSample>> {
        self.samples.lock().ok()?.get(id).cloned()
    }

    /// Drop sample sinks for tracks that have ended.
    pub fn prune_ended(&self, tracks: &[MediaTrack]) {
        if let Ok(mut samples) = self.samples.lock() {
            for track in tracks.iter().filter(|t| t.is_ended()) {
                samples.remove(track.id());
            }
        }
    }
}

fn ice_servers(ice: &IceConfig) -> Vec<RTCIceServer> {
    ice.servers
        .iter()
        .map(|s| RTCIceServer {
            urls: s.urls.clone(),
            username: s.username.clone().unwrap_or_default(),
            credential: s.credential.clone().unwrap_or_default(),
        })
        .collect()
}

#[async_trait]
impl TransportFactory for WebRtcTransportFactory {
    async fn create(
        &self,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(|e| TransportError::Create(e.to_string()))?,
        );
        register_callbacks(&pc, &sink);
        debug!(peer = %sink.peer_id(), epoch = sink.epoch(), "Peer connection created");

        Ok(Arc::new(WebRtcTransport {
            pc,
            samples: self.samples.clone(),
        }))
    }
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, sink: &TransportEventSink) {
    let candidates = sink.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // `None` marks the end of gathering; nothing to trickle.
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => candidates.local_candidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_m_line_index: init.sdp_mline_index,
                }),
                Err(e) => warn!(error = %e, "Failed to serialize local candidate"),
            }
        }
        Box::pin(async {})
    }));

    let states = sink.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        if let Some(state) = connectivity(state) {
            states.connectivity(state);
        }
        Box::pin(async {})
    }));

    let tracks = sink.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let kind = match track.kind() {
            RTPCodecType::Audio => Some(TrackKind::Audio),
            RTPCodecType::Video => Some(TrackKind::Video),
            _ => None,
        };
        if let Some(kind) = kind {
            info!(track = %track.id(), stream = %track.stream_id(), kind = kind.as_str(), "Remote track");
            tracks.remote_track(track.stream_id(), RemoteTrack::new(track.id(), kind));
        }
        Box::pin(async {})
    }));
}

fn connectivity(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    samples: Arc<Mutex<HashMap<TrackId, Arc<TrackLocalStaticSample>>>>,
}

impl WebRtcTransport {
    fn sample_for(&self, track: &MediaTrack) -> Result<Arc<TrackLocalStaticSample>, TransportError> {
        let mut samples = self
            .samples
            .lock()
            .map_err(|_| TransportError::Track("track registry poisoned".into()))?;
        let sample = samples.entry(track.id().clone()).or_insert_with(|| {
            let mime_type = match track.kind() {
                TrackKind::Video => MIME_TYPE_VP8,
                TrackKind::Audio => MIME_TYPE_OPUS,
            };
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: mime_type.to_string(),
                    ..Default::default()
                },
                track.id().to_string(),
                LOCAL_STREAM_ID.to_string(),
            ))
        });
        Ok(sample.clone())
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let converted = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    converted.map_err(|e| TransportError::Negotiation(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(TransportError::Negotiation(format!(
            "unsupported description type {other}"
        ))),
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: None,
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| TransportError::Candidate(e.to_string()))
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        let sample = self.sample_for(track)?;
        self.pc
            .add_track(sample as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| TransportError::Track(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "Error closing peer connection");
        }
    }
}
