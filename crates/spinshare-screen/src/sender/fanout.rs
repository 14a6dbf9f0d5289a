//! Sender fan-out manager: one session per receiver, all mirroring the same
//! capture.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use spinshare_common::{IceCandidate, PeerId, Recipient, SessionDescription, Signal};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ShareError;
use crate::events::ShareEvent;
use crate::media::CaptureHandle;
use crate::negotiation::{NegotiationOutcome, NegotiationState, PeerSession, Role, SessionContext};
use crate::transport::{TransportEvent, TransportEventKind};

// ---------------------------------------------------------------------------
// Fan-out Manager
// ---------------------------------------------------------------------------

/// Owns every sender-side session. A receiver id is either pending (known
/// while not capturing) or has a session, never both.
pub struct FanoutManager {
    ctx: SessionContext,
    capture: Option<Arc<CaptureHandle>>,
    sessions: HashMap<PeerId, PeerSession>,
    pending: BTreeSet<PeerId>,
    next_epoch: u64,
}

impl FanoutManager {
    pub fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            capture: None,
            sessions: HashMap::new(),
            pending: BTreeSet::new(),
            next_epoch: 0,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.capture.is_some()
    }

    pub fn session(&self, receiver: &PeerId) -> Option<&PeerSession> {
        self.sessions.get(receiver)
    }

    pub fn session_state(&self, receiver: &PeerId) -> Option<NegotiationState> {
        self.sessions.get(receiver).map(|s| s.state())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn pending(&self) -> &BTreeSet<PeerId> {
        &self.pending
    }

    pub fn is_pending(&self, receiver: &PeerId) -> bool {
        self.pending.contains(receiver)
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    pub async fn on_receiver_joined(&mut self, receiver: PeerId) {
        if self.capture.is_some() {
            self.open_session(receiver).await;
        } else {
            debug!(peer = %receiver, "Receiver pending until capture starts");
            self.pending.insert(receiver);
        }
    }

    /// Idempotent: unknown receivers are ignored.
    pub async fn on_receiver_left(&mut self, receiver: &PeerId) {
        self.pending.remove(receiver);
        if let Some(mut session) = self.sessions.remove(receiver) {
            session.close().await;
            self.ctx.emit(ShareEvent::SessionClosed {
                peer_id: receiver.clone(),
            });
        }
    }

    /// Receivers already in the room when we (re)joined. Ids that already
    /// have a session are left alone.
    pub async fn on_existing_receivers(&mut self, receivers: Vec<PeerId>) {
        for receiver in receivers {
            if self.sessions.contains_key(&receiver) || self.pending.contains(&receiver) {
                continue;
            }
            self.on_receiver_joined(receiver).await;
        }
    }

    /// A receiver asks for a fresh session, e.g. after reloading.
    pub async fn on_renegotiation_requested(&mut self, receiver: PeerId) {
        if self.capture.is_some() {
            self.open_session(receiver).await;
        } else {
            debug!(peer = %receiver, "Renegotiation requested while idle; pending");
            self.pending.insert(receiver);
        }
    }

    // -----------------------------------------------------------------------
    // Capture binding
    // -----------------------------------------------------------------------

    /// Bind a capture and offer it to every known receiver. Pending ids are
    /// drained exactly once; receivers with a stale session get a fresh one.
    pub async fn start_capture(&mut self, handle: Arc<CaptureHandle>) {
        if self.capture.replace(handle).is_some() {
            debug!("Capture rebound");
        }

        let mut targets = std::mem::take(&mut self.pending);
        targets.extend(self.sessions.keys().cloned());
        info!(receivers = targets.len(), "Capture bound, offering to receivers");

        for receiver in targets {
            self.open_session(receiver).await;
        }
        self.ctx.signaling.send(Recipient::Room, Signal::SenderReady);
    }

    /// Close every session, forget pending receivers, and drop our reference
    /// to the capture. Returns the handle that was bound, if any.
    pub async fn stop_capture(&mut self) -> Option<Arc<CaptureHandle>> {
        let handle = self.capture.take();
        self.pending.clear();

        let sessions: Vec<(PeerId, PeerSession)> = self.sessions.drain().collect();
        for (peer_id, mut session) in sessions {
            session.close().await;
            self.ctx.emit(ShareEvent::SessionClosed { peer_id });
        }

        if handle.is_some() {
            self.ctx.signaling.send(Recipient::Room, Signal::StopSharing);
            info!("Sharing stopped");
        }
        handle
    }

    /// Close the existing session first, then create and offer a new one.
    async fn open_session(&mut self, receiver: PeerId) {
        let Some(capture) = self.capture.clone() else {
            self.pending.insert(receiver);
            return;
        };
        self.pending.remove(&receiver);

        if let Some(mut old) = self.sessions.remove(&receiver) {
            old.close().await;
            let note = ShareError::DuplicateSessionReplaced {
                peer_id: receiver.clone(),
            };
            debug!(epoch = old.epoch(), "{note}");
        }

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let sink = self.ctx.links.sink(receiver.clone(), epoch);

        let mut session = match self.ctx.factory.create(sink).await {
            Ok(transport) => PeerSession::new(receiver.clone(), Role::Sender, epoch, Some(transport)),
            Err(e) => {
                let mut session = PeerSession::new(receiver.clone(), Role::Sender, epoch, None);
                let err = session.fail(e.to_string()).await;
                self.report_failure(err);
                self.sessions.insert(receiver, session);
                return;
            }
        };

        let started = match session.attach_tracks(capture.tracks()).await {
            Ok(()) => session.begin_offer(&self.ctx.links),
            Err(e) => Err(e),
        };
        match started {
            Ok(()) => {
                info!(peer = %receiver, epoch, tracks = capture.tracks().len(), "Offering session");
                self.emit_state(&session);
            }
            Err(e) => {
                let err = session.fail(e.to_string()).await;
                self.report_failure(err);
            }
        }
        self.sessions.insert(receiver, session);
    }

    // -----------------------------------------------------------------------
    // Negotiation traffic
    // -----------------------------------------------------------------------

    /// `session` is the offer tag the receiver echoed back. An answer to an
    /// offer we have since replaced is dropped; untagged answers are taken
    /// at face value.
    pub async fn on_answer(
        &mut self,
        from: PeerId,
        description: SessionDescription,
        session: Option<u64>,
    ) {
        let Some(current) = self.sessions.get_mut(&from) else {
            warn!(peer = %from, "Answer from unknown receiver");
            return;
        };
        let Some(session) = tagged(current, session) else {
            return;
        };
        if session.state() != NegotiationState::AwaitingAnswer {
            debug!(peer = %from, state = %session.state(), "Answer ignored");
            return;
        }

        let applied = match session.apply_remote(description).await {
            Ok(()) => session.transition(NegotiationState::Connected),
            Err(e) => Err(e),
        };
        match applied {
            Ok(()) => {
                info!(peer = %from, epoch = session.epoch(), "Session connected");
                let event = state_event(session);
                self.ctx.emit(event);
            }
            Err(e) => {
                let err = session.fail(e.to_string()).await;
                self.report_failure(err);
            }
        }
    }

    pub async fn on_candidate(&mut self, from: PeerId, candidate: IceCandidate, session: Option<u64>) {
        match self.sessions.get_mut(&from) {
            Some(current) => {
                if let Some(session) = tagged(current, session) {
                    session.on_remote_candidate(candidate).await;
                }
            }
            None => debug!(peer = %from, "Candidate from unknown receiver dropped"),
        }
    }

    // -----------------------------------------------------------------------
    // Async results
    // -----------------------------------------------------------------------

    pub async fn on_outcome(&mut self, outcome: NegotiationOutcome) {
        let NegotiationOutcome {
            peer_id,
            epoch,
            result,
        } = outcome;
        let Some(session) = current(&mut self.sessions, &peer_id, epoch) else {
            return;
        };

        match session.complete_local(result).await {
            Ok(description) => {
                self.ctx.signaling.send(
                    Recipient::Peer(peer_id.clone()),
                    Signal::Offer {
                        from_peer_id: self.ctx.local_id.clone(),
                        description,
                        session: Some(epoch),
                    },
                );
                let event = state_event(session);
                self.ctx.emit(event);
            }
            Err(err @ ShareError::StaleSessionDiscarded { .. }) => debug!("{err}"),
            Err(err) => self.report_failure(err),
        }
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        let TransportEvent {
            peer_id,
            epoch,
            kind,
        } = event;
        let Some(session) = current(&mut self.sessions, &peer_id, epoch) else {
            return;
        };

        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                self.ctx.signaling.send(
                    Recipient::Peer(peer_id),
                    Signal::Candidate {
                        from_peer_id: self.ctx.local_id.clone(),
                        candidate,
                        session: Some(epoch),
                    },
                );
            }
            TransportEventKind::Connectivity(state) => {
                let failure = session.on_connectivity(state).await;
                self.ctx.emit(ShareEvent::Connectivity {
                    peer_id,
                    state,
                });
                if let Some(err) = failure {
                    self.report_failure(err);
                }
            }
            TransportEventKind::RemoteTrack { .. } => {
                debug!(peer = %peer_id, "Ignoring remote track on sending side");
            }
        }
    }

    /// Fail every session that has sat in a negotiating state too long.
    pub async fn expire_stalled(&mut self, now: Instant) {
        let timeout = self.ctx.timeout;
        let stalled: Vec<PeerId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_stalled(now, timeout))
            .map(|(id, _)| id.clone())
            .collect();

        for peer_id in stalled {
            if let Some(session) = self.sessions.get_mut(&peer_id) {
                let reason = format!("no progress in {} after {:?}", session.state(), timeout);
                let err = session.fail(reason).await;
                self.report_failure(err);
            }
        }
    }

    fn emit_state(&self, session: &PeerSession) {
        self.ctx.emit(state_event(session));
    }

    fn report_failure(&self, err: ShareError) {
        match err {
            ShareError::NegotiationFailed { peer_id, reason } => {
                self.ctx.emit(ShareEvent::SessionState {
                    peer_id: peer_id.clone(),
                    state: NegotiationState::Failed,
                });
                self.ctx.emit(ShareEvent::NegotiationFailed { peer_id, reason });
            }
            other => warn!(error = %other, "Session error"),
        }
    }
}

fn state_event(session: &PeerSession) -> ShareEvent {
    ShareEvent::SessionState {
        peer_id: session.peer_id().clone(),
        state: session.state(),
    }
}

/// The session for `peer_id` if `epoch` is still its current epoch.
fn current<'a>(
    sessions: &'a mut HashMap<PeerId, PeerSession>,
    peer_id: &PeerId,
    epoch: u64,
) -> Option<&'a mut PeerSession> {
    match sessions.get_mut(peer_id) {
        Some(session) if session.epoch() == epoch => Some(session),
        _ => {
            let note = ShareError::StaleSessionDiscarded {
                peer_id: peer_id.clone(),
                epoch,
            };
            debug!("{note}");
            None
        }
    }
}

/// `session` unless the receiver tagged its message for a different epoch.
fn tagged(session: &mut PeerSession, tag: Option<u64>) -> Option<&mut PeerSession> {
    match tag {
        Some(epoch) if epoch != session.epoch() => {
            let note = ShareError::StaleSessionDiscarded {
                peer_id: session.peer_id().clone(),
                epoch,
            };
            debug!(current = session.epoch(), "{note}");
            None
        }
        _ => Some(session),
    }
}
