//! Per-peer negotiation: state machine, candidate reorder buffer, and the
//! plumbing that carries async results back to the owning event loop.
//!
//! Managers own their sessions outright and are driven from one loop, so
//! nothing here is locked. Work that must not block the loop (producing a
//! local description) runs in a spawned task and comes back as a
//! [`NegotiationOutcome`]; the manager applies it only if the session's
//! epoch is still current.

mod buffer;
mod session;
mod state;

use std::sync::Arc;
use std::time::Duration;

use spinshare_common::{PeerId, SessionDescription};
use spinshare_config::schema::NegotiationConfig;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::events::ShareEvent;
use crate::signaling::SignalingChannel;
use crate::transport::{TransportEvent, TransportEventSink, TransportFactory};

pub use buffer::CandidateBuffer;
pub use session::PeerSession;
pub use state::{NegotiationState, Role};

/// Result of a spawned description-production job.
#[derive(Debug)]
pub struct NegotiationOutcome {
    pub peer_id: PeerId,
    pub epoch: u64,
    pub result: Result<SessionDescription, TransportError>,
}

/// Senders that carry async results back into the event loop.
#[derive(Debug, Clone)]
pub struct SessionLinks {
    pub(crate) outcomes: mpsc::UnboundedSender<NegotiationOutcome>,
    pub(crate) transport: mpsc::UnboundedSender<TransportEvent>,
}

impl SessionLinks {
    pub(crate) fn sink(&self, peer_id: PeerId, epoch: u64) -> TransportEventSink {
        TransportEventSink::new(peer_id, epoch, self.transport.clone())
    }
}

/// The receiving ends of [`SessionLinks`], polled by the event loop.
#[derive(Debug)]
pub struct SessionInbox {
    pub outcomes: mpsc::UnboundedReceiver<NegotiationOutcome>,
    pub transport: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Everything a manager needs from the outside world.
#[derive(Clone)]
pub struct SessionContext {
    pub(crate) local_id: PeerId,
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) signaling: Arc<dyn SignalingChannel>,
    pub(crate) links: SessionLinks,
    pub(crate) events: mpsc::Sender<ShareEvent>,
    pub(crate) timeout: Duration,
}

impl SessionContext {
    /// Build a context plus the inbox and UI event receiver that go with it.
    pub fn new(
        local_id: PeerId,
        factory: Arc<dyn TransportFactory>,
        signaling: Arc<dyn SignalingChannel>,
        negotiation: &NegotiationConfig,
    ) -> (Self, SessionInbox, mpsc::Receiver<ShareEvent>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(256);

        let ctx = Self {
            local_id,
            factory,
            signaling,
            links: SessionLinks {
                outcomes: outcome_tx,
                transport: transport_tx,
            },
            events: event_tx,
            timeout: negotiation.timeout(),
        };
        let inbox = SessionInbox {
            outcomes: outcome_rx,
            transport: transport_rx,
        };
        (ctx, inbox, event_rx)
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub(crate) fn emit(&self, event: ShareEvent) {
        crate::events::publish(&self.events, event);
    }
}
