//! Media transport abstraction.
//!
//! A [`PeerTransport`] is the negotiation primitive for one peer link (a
//! WebRTC peer connection in production, a scripted fake in tests). Its
//! callbacks are not closures registered on the transport; they are
//! [`TransportEvent`]s pushed into the owning event loop, stamped with the
//! session epoch so events from a superseded session can be dropped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use spinshare_common::{IceCandidate, PeerId, SessionDescription};
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::media::{MediaTrack, RemoteTrack};

// ---------------------------------------------------------------------------
// Connectivity
// ---------------------------------------------------------------------------

/// Connectivity of the underlying transport, as reported by it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectivityState {
    #[default]
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectivityState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }

    /// States that end a session. Disconnected counts: recovery is the
    /// caller's decision, through a fresh renegotiation.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// A local network candidate was gathered and should be trickled.
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
    /// The remote side's media arrived.
    RemoteTrack { stream_id: String, track: RemoteTrack },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub kind: TransportEventKind,
}

/// Where a transport reports its callbacks. Bound to one session epoch.
#[derive(Debug, Clone)]
pub struct TransportEventSink {
    peer_id: PeerId,
    epoch: u64,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportEventSink {
    pub fn new(peer_id: PeerId, epoch: u64, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { peer_id, epoch, tx }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn emit(&self, kind: TransportEventKind) {
        let _ = self.tx.send(TransportEvent {
            peer_id: self.peer_id.clone(),
            epoch: self.epoch,
            kind,
        });
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEventKind::LocalCandidate(candidate));
    }

    pub fn connectivity(&self, state: ConnectivityState) {
        self.emit(TransportEventKind::Connectivity(state));
    }

    pub fn remote_track(&self, stream_id: impl Into<String>, track: RemoteTrack) {
        self.emit(TransportEventKind::RemoteTrack {
            stream_id: stream_id.into(),
            track,
        });
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One peer link. Methods take `&self` because description production runs
/// in a spawned task while the event loop keeps applying candidates.
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError>;

    /// Attach a local track. The transport mirrors the track; it never ends it.
    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError>;

    /// Release transport resources. Must tolerate being called mid-negotiation.
    async fn close(&self);
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::TrackKind;

    #[test]
    fn failure_states() {
        assert!(ConnectivityState::Failed.is_failure());
        assert!(ConnectivityState::Disconnected.is_failure());
        assert!(!ConnectivityState::Connecting.is_failure());
        assert!(!ConnectivityState::Closed.is_failure());
    }

    #[test]
    fn sink_stamps_peer_and_epoch() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportEventSink::new(PeerId::from("v1"), 7, tx);
        sink.local_candidate(IceCandidate::new("c1"));
        sink.remote_track("s", RemoteTrack::new("t", TrackKind::Video));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.peer_id, PeerId::from("v1"));
        assert_eq!(first.epoch, 7);
        assert_eq!(
            first.kind,
            TransportEventKind::LocalCandidate(IceCandidate::new("c1"))
        );
        let second = rx.try_recv().unwrap();
        assert!(matches!(second.kind, TransportEventKind::RemoteTrack { .. }));
    }

    #[test]
    fn sink_tolerates_closed_loop() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let sink = TransportEventSink::new(PeerId::from("v1"), 1, tx);
        sink.connectivity(ConnectivityState::Connected);
    }
}
