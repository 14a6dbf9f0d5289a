//! Events surfaced to the UI layer.

use serde::Serialize;
use spinshare_common::PeerId;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::media::{RemoteTrack, TrackId};
use crate::negotiation::NegotiationState;
use crate::transport::ConnectivityState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ShareEvent {
    /// A session moved to a new negotiation state.
    SessionState {
        peer_id: PeerId,
        state: NegotiationState,
    },
    Connectivity {
        peer_id: PeerId,
        state: ConnectivityState,
    },
    /// A session failed. Not retried; the caller decides.
    NegotiationFailed { peer_id: PeerId, reason: String },
    SessionClosed { peer_id: PeerId },
    CaptureStarted { track_ids: Vec<TrackId> },
    CaptureStopped,
    CaptureDenied { reason: String },
    /// A remote track was merged into the inbound stream.
    TrackAdded { stream_id: String, track: RemoteTrack },
    StreamCleared,
}

impl ShareEvent {
    /// Whether this reports a failure the user should see.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::NegotiationFailed { .. } | Self::CaptureDenied { .. }
        )
    }
}

/// Hand an event to the UI without waiting. A UI that stops draining its
/// receiver loses events; the endpoint loop keeps running.
pub(crate) fn publish(events: &mpsc::Sender<ShareEvent>, event: ShareEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(?event, "UI event queue full, event dropped");
        }
        Err(TrySendError::Closed(_)) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_for_the_ui() {
        let event = ShareEvent::SessionState {
            peer_id: PeerId::from("v1"),
            state: NegotiationState::AwaitingAnswer,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "session-state");
        assert_eq!(value["peer_id"], "v1");
        assert_eq!(value["state"], "awaiting-answer");
    }

    #[test]
    fn failure_classification() {
        assert!(ShareEvent::CaptureDenied {
            reason: "cancelled".into()
        }
        .is_failure());
        assert!(!ShareEvent::CaptureStopped.is_failure());
    }

    #[test]
    fn publish_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel(1);
        publish(&tx, ShareEvent::CaptureStopped);
        publish(&tx, ShareEvent::StreamCleared);
        assert_eq!(rx.try_recv().unwrap(), ShareEvent::CaptureStopped);
        assert!(rx.try_recv().is_err());

        drop(rx);
        publish(&tx, ShareEvent::CaptureStopped);
    }
}
