//! Error types for the screen-share core.
//!
//! Only [`ShareError::NegotiationFailed`] and [`ShareError::CaptureDenied`]
//! ever reach the UI. The stale/duplicate variants exist so bookkeeping
//! decisions can be logged with a uniform shape.

use spinshare_common::PeerId;

use crate::negotiation::NegotiationState;

/// Failures reported by a [`PeerTransport`](crate::transport::PeerTransport).
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("failed to create transport: {0}")]
    Create(String),

    #[error("negotiation error: {0}")]
    Negotiation(String),

    #[error("candidate rejected: {0}")]
    Candidate(String),

    #[error("track error: {0}")]
    Track(String),
}

/// Failures reported by a [`CaptureSource`](crate::capture::CaptureSource).
#[derive(Debug, Clone, thiserror::Error)]
pub enum CaptureError {
    #[error("capture denied: {0}")]
    Denied(String),

    #[error("capture cancelled by user")]
    Cancelled,

    #[error("capture unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ShareError {
    #[error("negotiation with {peer_id} failed: {reason}")]
    NegotiationFailed { peer_id: PeerId, reason: String },

    #[error("screen capture denied: {0}")]
    CaptureDenied(String),

    #[error("discarded result for superseded session {peer_id}#{epoch}")]
    StaleSessionDiscarded { peer_id: PeerId, epoch: u64 },

    #[error("session with {peer_id} replaced by a newer one")]
    DuplicateSessionReplaced { peer_id: PeerId },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("invalid transition for {peer_id}: {from} -> {to}")]
    InvalidTransition {
        peer_id: PeerId,
        from: NegotiationState,
        to: NegotiationState,
    },

    #[error("endpoint is no longer running")]
    EndpointClosed,
}

impl From<CaptureError> for ShareError {
    fn from(err: CaptureError) -> Self {
        Self::CaptureDenied(err.to_string())
    }
}

impl ShareError {
    /// Whether this error is meant for the user rather than the logs.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Self::NegotiationFailed { .. } | Self::CaptureDenied(_))
    }
}
