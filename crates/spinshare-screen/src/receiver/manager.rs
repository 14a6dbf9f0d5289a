//! Receiver session manager: exactly one session to the sender, and the
//! inbound stream it produces.

use std::collections::HashMap;

use spinshare_common::{IceCandidate, PeerId, Recipient, SessionDescription, Signal};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::ShareError;
use crate::events::ShareEvent;
use crate::media::{InboundStream, RemoteTrack};
use crate::negotiation::{
    CandidateBuffer, NegotiationOutcome, NegotiationState, PeerSession, Role, SessionContext,
};
use crate::transport::{TransportEvent, TransportEventKind};

// ---------------------------------------------------------------------------
// Receiver Manager
// ---------------------------------------------------------------------------

/// Candidates held for an offer that has not arrived, with the offer tag
/// they were sent under.
#[derive(Default)]
struct EarlyCandidates {
    session: Option<u64>,
    buffer: CandidateBuffer,
}

pub struct ReceiverManager {
    ctx: SessionContext,
    session: Option<PeerSession>,
    /// Tag of the offer the current session answers, echoed back on
    /// everything we send for it.
    offer_tag: Option<u64>,
    /// A renegotiation request is out and no offer has arrived yet.
    awaiting_offer: bool,
    /// Candidates that arrived with no session to hold them, per sender.
    early: HashMap<PeerId, EarlyCandidates>,
    stream_tx: watch::Sender<Option<InboundStream>>,
    next_epoch: u64,
}

impl ReceiverManager {
    pub fn new(ctx: SessionContext) -> Self {
        let (stream_tx, _) = watch::channel(None);
        Self {
            ctx,
            session: None,
            offer_tag: None,
            awaiting_offer: false,
            early: HashMap::new(),
            stream_tx,
            next_epoch: 0,
        }
    }

    /// Observe the inbound stream. `None` while nothing is being received.
    pub fn stream(&self) -> watch::Receiver<Option<InboundStream>> {
        self.stream_tx.subscribe()
    }

    pub fn current_stream(&self) -> Option<InboundStream> {
        self.stream_tx.borrow().clone()
    }

    pub fn session(&self) -> Option<&PeerSession> {
        self.session.as_ref()
    }

    pub fn state(&self) -> NegotiationState {
        match &self.session {
            Some(session) => session.state(),
            None if self.awaiting_offer => NegotiationState::AwaitingOffer,
            None => NegotiationState::Idle,
        }
    }

    /// Whether a session is up or on its way up.
    pub fn is_established(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.is_live())
    }

    pub fn early_candidates(&self) -> usize {
        self.early.values().map(|e| e.buffer.len()).sum()
    }

    // -----------------------------------------------------------------------
    // Requests
    // -----------------------------------------------------------------------

    /// Ask the sender for a session unless one is live or already requested.
    /// Returns whether a request was sent.
    pub async fn request_stream(&mut self) -> bool {
        if self.is_established() || self.awaiting_offer {
            return false;
        }
        if let Some(mut dead) = self.session.take() {
            dead.close().await;
        }
        self.send_request();
        self.awaiting_offer = true;
        self.ctx.emit(ShareEvent::SessionState {
            peer_id: self.ctx.local_id.clone(),
            state: NegotiationState::AwaitingOffer,
        });
        true
    }

    fn send_request(&self) {
        info!("Requesting stream from sender");
        self.ctx.signaling.send(
            Recipient::Sender,
            Signal::RenegotiateRequest {
                peer_id: self.ctx.local_id.clone(),
            },
        );
    }

    // -----------------------------------------------------------------------
    // Sender signals
    // -----------------------------------------------------------------------

    /// Replace any existing session with a fresh one answering this offer.
    /// Held candidates carry over only if they were sent for this offer.
    pub async fn on_offer(
        &mut self,
        sender: PeerId,
        description: SessionDescription,
        tag: Option<u64>,
    ) {
        let early = self.early.remove(&sender).unwrap_or_default();
        self.early.clear();
        let carried = match (early.session, tag) {
            (Some(held), Some(offered)) if held != offered => {
                debug!(
                    peer = %sender,
                    held,
                    offered,
                    dropped = early.buffer.len(),
                    "Held candidates belong to another offer"
                );
                CandidateBuffer::new()
            }
            _ => early.buffer,
        };

        if let Some(mut old) = self.session.take() {
            if old.is_live() {
                let note = ShareError::DuplicateSessionReplaced {
                    peer_id: old.peer_id().clone(),
                };
                debug!(epoch = old.epoch(), "{note}");
            }
            old.close().await;
            self.ctx.emit(ShareEvent::SessionClosed {
                peer_id: old.peer_id().clone(),
            });
        }
        self.clear_stream();
        self.awaiting_offer = false;
        self.offer_tag = tag;

        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let sink = self.ctx.links.sink(sender.clone(), epoch);

        let mut session = match self.ctx.factory.create(sink).await {
            Ok(transport) => PeerSession::new(sender.clone(), Role::Receiver, epoch, Some(transport)),
            Err(e) => {
                let mut session = PeerSession::new(sender.clone(), Role::Receiver, epoch, None);
                let err = session.fail(e.to_string()).await;
                self.session = Some(session);
                self.report_failure(err);
                return;
            }
        };
        session.adopt_candidates(carried);

        let answered = async {
            session.await_offer()?;
            session.apply_remote(description).await?;
            session.begin_answer(&self.ctx.links)
        }
        .await;

        match answered {
            Ok(()) => {
                info!(peer = %sender, epoch, "Answering offer");
                self.ctx.emit(state_event(&session));
                self.session = Some(session);
            }
            Err(e) => {
                let err = session.fail(e.to_string()).await;
                self.session = Some(session);
                self.report_failure(err);
            }
        }
    }

    /// Apply a sender candidate to the live session, or hold it until the
    /// offer it was sent under shows up. Candidates tagged for an older
    /// offer than the one we answer are dropped.
    pub async fn on_candidate(&mut self, sender: PeerId, candidate: IceCandidate, tag: Option<u64>) {
        if let Some(session) = &mut self.session {
            if session.peer_id() == &sender && session.is_live() {
                match (self.offer_tag, tag) {
                    (Some(current), Some(sent)) if sent < current => {
                        let note = ShareError::StaleSessionDiscarded {
                            peer_id: sender,
                            epoch: sent,
                        };
                        debug!(current, "{note}");
                        return;
                    }
                    (Some(current), Some(sent)) if sent > current => {}
                    _ => {
                        session.on_remote_candidate(candidate).await;
                        return;
                    }
                }
            }
        }

        let early = self.early.entry(sender.clone()).or_default();
        match (early.session, tag) {
            (Some(held), Some(sent)) if sent < held => {
                debug!(peer = %sender, held, sent, "Candidate for an older offer dropped");
                return;
            }
            (Some(held), Some(sent)) if sent > held => {
                early.buffer.clear();
                early.session = Some(sent);
            }
            (None, Some(sent)) => early.session = Some(sent),
            _ => {}
        }
        early.buffer.push(candidate);
        debug!(peer = %sender, buffered = early.buffer.len(), "Candidate held until offer");
    }

    pub async fn on_sender_stopped(&mut self) {
        info!("Sender stopped sharing");
        self.reset().await;
    }

    /// The sender's process came back; whatever we hold is stale.
    pub async fn on_sender_reconnected(&mut self) {
        info!("Sender reconnected, renegotiating");
        self.reset().await;
        self.request_stream().await;
    }

    /// Local teardown, e.g. when the viewer leaves.
    pub async fn close(&mut self) {
        self.reset().await;
    }

    async fn reset(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            self.ctx.emit(ShareEvent::SessionClosed {
                peer_id: session.peer_id().clone(),
            });
        }
        self.awaiting_offer = false;
        self.offer_tag = None;
        self.early.clear();
        self.clear_stream();
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
        let Some(session) = current(&mut self.session, &peer_id, epoch) else {
            return;
        };

        match session.complete_local(result).await {
            Ok(description) => {
                self.ctx.signaling.send(
                    Recipient::Peer(peer_id.clone()),
                    Signal::Answer {
                        from_peer_id: self.ctx.local_id.clone(),
                        description,
                        session: self.offer_tag,
                    },
                );
                info!(peer = %peer_id, epoch, "Session connected");
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
        let Some(session) = current(&mut self.session, &peer_id, epoch) else {
            return;
        };

        match kind {
            TransportEventKind::LocalCandidate(candidate) => {
                self.ctx.signaling.send(
                    Recipient::Peer(peer_id),
                    Signal::Candidate {
                        from_peer_id: self.ctx.local_id.clone(),
                        candidate,
                        session: self.offer_tag,
                    },
                );
            }
            TransportEventKind::Connectivity(state) => {
                let failure = session.on_connectivity(state).await;
                self.ctx.emit(ShareEvent::Connectivity { peer_id, state });
                if let Some(err) = failure {
                    self.report_failure(err);
                }
            }
            TransportEventKind::RemoteTrack { stream_id, track } => {
                if session.is_live() {
                    self.add_track(stream_id, track);
                }
            }
        }
    }

    /// Fail the session if its answer has not completed in time.
    pub async fn expire_stalled(&mut self, now: Instant) {
        let timeout = self.ctx.timeout;
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.is_stalled(now, timeout) {
            return;
        }
        let reason = format!("no progress in {} after {:?}", session.state(), timeout);
        let err = session.fail(reason).await;
        self.report_failure(err);
    }

    // -----------------------------------------------------------------------
    // Inbound stream
    // -----------------------------------------------------------------------

    /// Merge a track into the current stream, creating it on first track.
    fn add_track(&mut self, stream_id: String, track: RemoteTrack) {
        let added = self.stream_tx.send_if_modified(|slot| match slot {
            Some(stream) => stream.add_track(track.clone()),
            None => {
                let mut stream = InboundStream::new(stream_id.clone());
                stream.add_track(track.clone());
                *slot = Some(stream);
                true
            }
        });
        if added {
            debug!(stream = %stream_id, track = %track.id, kind = track.kind.as_str(), "Remote track added");
            self.ctx.emit(ShareEvent::TrackAdded { stream_id, track });
        }
    }

    fn clear_stream(&mut self) {
        let cleared = self.stream_tx.send_if_modified(|slot| slot.take().is_some());
        if cleared {
            self.ctx.emit(ShareEvent::StreamCleared);
        }
    }

    fn report_failure(&mut self, err: ShareError) {
        match err {
            ShareError::NegotiationFailed { peer_id, reason } => {
                self.clear_stream();
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

fn current<'a>(
    slot: &'a mut Option<PeerSession>,
    peer_id: &PeerId,
    epoch: u64,
) -> Option<&'a mut PeerSession> {
    match slot {
        Some(session) if session.peer_id() == peer_id && session.epoch() == epoch => Some(session),
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
