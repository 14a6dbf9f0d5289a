//! Screen-share signaling and peer-session lifecycle.
//!
//! One sender fans its screen capture out to any number of receivers, each
//! over its own negotiated media session, coordinated through an unreliable
//! signaling channel. [`endpoint`] holds the drivers an application runs;
//! the managers underneath are usable on their own.

pub mod capture;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod media;
pub mod negotiation;
pub mod receiver;
pub mod sender;
pub mod signaling;
pub mod transport;

#[cfg(feature = "webrtc-transport")]
pub mod rtc;

#[cfg(test)]
mod test_support;

pub use capture::{CaptureConstraints, CaptureManager, CaptureSource};
pub use endpoint::{EndpointParts, HostEndpoint, HostHandle, ViewerEndpoint, ViewerHandle};
pub use error::{CaptureError, ShareError, TransportError};
pub use events::ShareEvent;
pub use media::{CaptureHandle, InboundStream, MediaTrack, RemoteTrack, TrackId, TrackKind};
pub use negotiation::{CandidateBuffer, NegotiationState, PeerSession, Role};
pub use receiver::ReceiverManager;
pub use sender::FanoutManager;
pub use signaling::{RelayClient, RelayClientConfig, SignalingChannel};
pub use transport::{ConnectivityState, PeerTransport, TransportEventSink, TransportFactory};

#[cfg(feature = "webrtc-transport")]
pub use rtc::WebRtcTransportFactory;
