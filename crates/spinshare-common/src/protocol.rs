//! Signaling wire protocol shared by the relay and its clients.
//!
//! Every frame is a JSON text message. Clients identify themselves with a
//! `hello` frame and then exchange [`Signal`]s addressed by [`Recipient`].
//! The relay stamps the sender identity on forwarded signals and injects
//! membership signals (`peer-joined`, `peer-left`, `existing-receivers`,
//! `sender-reconnected`) on its own.

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;
use crate::id::PeerId;

// ---------------------------------------------------------------------------
// Negotiation payloads
// ---------------------------------------------------------------------------

/// Which half of an offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque session description produced by the media transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Network-path candidate for NAT traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Events carried over the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Signal {
    /// A receiver entered the room.
    #[serde(rename_all = "camelCase")]
    PeerJoined { peer_id: PeerId },
    /// A receiver left the room or disconnected.
    #[serde(rename_all = "camelCase")]
    PeerLeft { peer_id: PeerId },
    /// Session description offered by the sender. `session` identifies
    /// this offer; the receiver echoes it on everything it sends back.
    #[serde(rename_all = "camelCase")]
    Offer {
        from_peer_id: PeerId,
        description: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<u64>,
    },
    /// Session description answered by a receiver.
    #[serde(rename_all = "camelCase")]
    Answer {
        from_peer_id: PeerId,
        description: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<u64>,
    },
    /// Trickled network candidate, either direction.
    #[serde(rename_all = "camelCase")]
    Candidate {
        from_peer_id: PeerId,
        candidate: IceCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<u64>,
    },
    /// A receiver asks the sender for a fresh session.
    #[serde(rename_all = "camelCase")]
    RenegotiateRequest { peer_id: PeerId },
    /// The sender stopped sharing; receivers drop their session.
    StopSharing,
    /// The sender's process came back; receivers must renegotiate.
    SenderReconnected,
    /// Receivers already present when the sender (re)joined or became ready.
    #[serde(rename_all = "camelCase")]
    ExistingReceivers { peer_ids: Vec<PeerId> },
    /// The sender started capturing.
    SenderReady,
}

impl Signal {
    /// Wire name of the event, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PeerJoined { .. } => "peer-joined",
            Self::PeerLeft { .. } => "peer-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::Candidate { .. } => "candidate",
            Self::RenegotiateRequest { .. } => "renegotiate-request",
            Self::StopSharing => "stop-sharing",
            Self::SenderReconnected => "sender-reconnected",
            Self::ExistingReceivers { .. } => "existing-receivers",
            Self::SenderReady => "sender-ready",
        }
    }
}

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// Role a client plays in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerRole {
    Sender,
    Receiver,
}

/// Destination of an outbound signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "peerId", rename_all = "lowercase")]
pub enum Recipient {
    /// One specific member of the room.
    Peer(PeerId),
    /// Whoever is currently the room's sender.
    Sender,
    /// Every other member of the room.
    Room,
}

// ---------------------------------------------------------------------------
// Relay frames
// ---------------------------------------------------------------------------

/// Frames a client sends to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    /// Must be the first frame on a connection.
    #[serde(rename_all = "camelCase")]
    Hello {
        room_id: String,
        peer_id: PeerId,
        role: PeerRole,
    },
    Signal {
        to: Recipient,
        signal: Signal,
    },
}

/// Frames the relay sends to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayFrame {
    #[serde(rename_all = "camelCase")]
    Ready { room_id: String },
    Signal {
        /// `None` for signals generated by the relay itself.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<PeerId>,
        signal: Signal,
    },
    Error {
        message: String,
    },
}

impl ClientFrame {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

impl RelayFrame {
    /// Error text sent to a sender whose room was taken over by another
    /// sender connection. Clients that see it must not reconnect.
    pub const SENDER_REPLACED: &'static str = "replaced by another sender";

    pub fn is_sender_replaced(&self) -> bool {
        matches!(self, Self::Error { message } if message == Self::SENDER_REPLACED)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn peer_joined_uses_kebab_event_and_camel_fields() {
        let signal = Signal::PeerJoined {
            peer_id: PeerId::from("viewer-1"),
        };
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value, json!({"event": "peer-joined", "peerId": "viewer-1"}));
    }

    #[test]
    fn unit_signals_carry_only_the_event() {
        let value = serde_json::to_value(Signal::StopSharing).unwrap();
        assert_eq!(value, json!({"event": "stop-sharing"}));
        let value = serde_json::to_value(Signal::SenderReconnected).unwrap();
        assert_eq!(value, json!({"event": "sender-reconnected"}));
    }

    #[test]
    fn offer_parses_from_browser_shaped_json() {
        let text = r#"{
            "event": "offer",
            "fromPeerId": "host",
            "description": {"type": "offer", "sdp": "v=0"}
        }"#;
        let signal: Signal = serde_json::from_str(text).unwrap();
        assert_eq!(
            signal,
            Signal::Offer {
                from_peer_id: PeerId::from("host"),
                description: SessionDescription::offer("v=0"),
                session: None,
            }
        );
    }

    #[test]
    fn session_tag_is_carried_when_present() {
        let signal = Signal::Answer {
            from_peer_id: PeerId::from("viewer"),
            description: SessionDescription::answer("v=0"),
            session: Some(7),
        };
        let value = serde_json::to_value(&signal).unwrap();
        assert_eq!(value["session"], 7);
        assert_eq!(serde_json::from_value::<Signal>(value).unwrap(), signal);
    }

    #[test]
    fn candidate_field_names_match_rtc_ice_candidate_init() {
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        };
        let value = serde_json::to_value(&candidate).unwrap();
        assert_eq!(value["sdpMid"], "0");
        assert_eq!(value["sdpMLineIndex"], 0);
    }

    #[test]
    fn candidate_optional_fields_default_to_none() {
        let candidate: IceCandidate = serde_json::from_str(r#"{"candidate": "c"}"#).unwrap();
        assert_eq!(candidate, IceCandidate::new("c"));
    }

    #[test]
    fn signal_name_matches_serialized_event() {
        let signals = [
            Signal::RenegotiateRequest {
                peer_id: PeerId::from("v"),
            },
            Signal::ExistingReceivers { peer_ids: vec![] },
            Signal::SenderReady,
        ];
        for signal in signals {
            let value = serde_json::to_value(&signal).unwrap();
            assert_eq!(value["event"], signal.name());
        }
    }

    #[test]
    fn recipient_encoding() {
        let value = serde_json::to_value(Recipient::Peer(PeerId::from("v1"))).unwrap();
        assert_eq!(value, json!({"kind": "peer", "peerId": "v1"}));
        let value = serde_json::to_value(Recipient::Room).unwrap();
        assert_eq!(value, json!({"kind": "room"}));
    }

    #[test]
    fn hello_frame_parses() {
        let frame = ClientFrame::from_json(
            r#"{"type":"hello","roomId":"r1","peerId":"v1","role":"receiver"}"#,
        )
        .unwrap();
        assert_eq!(
            frame,
            ClientFrame::Hello {
                room_id: "r1".into(),
                peer_id: PeerId::from("v1"),
                role: PeerRole::Receiver,
            }
        );
    }

    #[test]
    fn relay_generated_signal_omits_from() {
        let frame = RelayFrame::Signal {
            from: None,
            signal: Signal::SenderReconnected,
        };
        let json = frame.to_json().unwrap();
        assert!(!json.contains("from"));
        assert_eq!(RelayFrame::from_json(&json).unwrap(), frame);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = RelayFrame::from_json("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn only_the_replacement_error_stops_a_sender() {
        let replaced = RelayFrame::Error {
            message: RelayFrame::SENDER_REPLACED.into(),
        };
        assert!(replaced.is_sender_replaced());
        assert!(!RelayFrame::Error {
            message: "already joined".into()
        }
        .is_sender_replaced());
        assert!(!RelayFrame::Ready {
            room_id: "r".into()
        }
        .is_sender_replaced());
    }
}
