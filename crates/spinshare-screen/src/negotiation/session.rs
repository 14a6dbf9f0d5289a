//! One negotiated (or negotiating) media link to a single peer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use spinshare_common::{IceCandidate, PeerId, SdpKind, SessionDescription};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{ShareError, TransportError};
use crate::media::MediaTrack;
use crate::transport::{ConnectivityState, PeerTransport};

use super::buffer::CandidateBuffer;
use super::state::{NegotiationState, Role};
use super::{NegotiationOutcome, SessionLinks};

/// A session never applies a candidate before its remote description is
/// set. Earlier candidates wait in `pending_candidates` and are flushed in
/// arrival order right after the description lands.
pub struct PeerSession {
    peer_id: PeerId,
    role: Role,
    epoch: u64,
    state: NegotiationState,
    state_since: Instant,
    connectivity: ConnectivityState,
    transport: Option<Arc<dyn PeerTransport>>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_candidates: CandidateBuffer,
    media_tracks: Vec<MediaTrack>,
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("peer_id", &self.peer_id)
            .field("role", &self.role)
            .field("epoch", &self.epoch)
            .field("state", &self.state)
            .field("connectivity", &self.connectivity)
            .field("pending_candidates", &self.pending_candidates.len())
            .field("media_tracks", &self.media_tracks.len())
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    pub(crate) fn new(
        peer_id: PeerId,
        role: Role,
        epoch: u64,
        transport: Option<Arc<dyn PeerTransport>>,
    ) -> Self {
        Self {
            peer_id,
            role,
            epoch,
            state: NegotiationState::Idle,
            state_since: Instant::now(),
            connectivity: ConnectivityState::New,
            transport,
            local_description: None,
            remote_description: None,
            pending_candidates: CandidateBuffer::new(),
            media_tracks: Vec::new(),
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.connectivity
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub fn media_tracks(&self) -> &[MediaTrack] {
        &self.media_tracks
    }

    pub fn is_live(&self) -> bool {
        !self.state.is_terminal()
    }

    // -----------------------------------------------------------------------
    // State machine
    // -----------------------------------------------------------------------

    pub(crate) fn transition(&mut self, to: NegotiationState) -> Result<(), ShareError> {
        if !self.state.can_transition(to, self.role) {
            return Err(ShareError::InvalidTransition {
                peer_id: self.peer_id.clone(),
                from: self.state,
                to,
            });
        }
        debug!(
            peer = %self.peer_id,
            epoch = self.epoch,
            from = %self.state,
            to = %to,
            "Session transition"
        );
        self.state = to;
        self.state_since = Instant::now();
        Ok(())
    }

    fn transport(&self) -> Result<Arc<dyn PeerTransport>, ShareError> {
        self.transport.clone().ok_or_else(|| {
            ShareError::Transport(TransportError::Create(format!(
                "session {}#{} has no transport",
                self.peer_id, self.epoch
            )))
        })
    }

    /// Mirror the capture's tracks into this session.
    pub(crate) async fn attach_tracks(&mut self, tracks: &[MediaTrack]) -> Result<(), ShareError> {
        let transport = self.transport()?;
        for track in tracks {
            transport.add_track(track).await?;
            self.media_tracks.push(track.clone());
        }
        Ok(())
    }

    /// `Idle -> Offering`, with offer production running in the background.
    pub(crate) fn begin_offer(&mut self, links: &SessionLinks) -> Result<(), ShareError> {
        let transport = self.transport()?;
        self.transition(NegotiationState::Offering)?;
        self.spawn_description_job(transport, links, SdpKind::Offer);
        Ok(())
    }

    /// `Idle -> AwaitingOffer`.
    pub(crate) fn await_offer(&mut self) -> Result<(), ShareError> {
        self.transition(NegotiationState::AwaitingOffer)
    }

    /// `AwaitingOffer -> Answering`, with answer production in the background.
    pub(crate) fn begin_answer(&mut self, links: &SessionLinks) -> Result<(), ShareError> {
        let transport = self.transport()?;
        self.transition(NegotiationState::Answering)?;
        self.spawn_description_job(transport, links, SdpKind::Answer);
        Ok(())
    }

    fn spawn_description_job(
        &self,
        transport: Arc<dyn PeerTransport>,
        links: &SessionLinks,
        kind: SdpKind,
    ) {
        let outcomes: mpsc::UnboundedSender<NegotiationOutcome> = links.outcomes.clone();
        let peer_id = self.peer_id.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let result = produce_description(transport.as_ref(), kind).await;
            let _ = outcomes.send(NegotiationOutcome {
                peer_id,
                epoch,
                result,
            });
        });
    }

    /// Apply a finished description job for this epoch. Returns the
    /// description to put on the wire.
    pub(crate) async fn complete_local(
        &mut self,
        result: Result<SessionDescription, TransportError>,
    ) -> Result<SessionDescription, ShareError> {
        let next = match self.state {
            NegotiationState::Offering => NegotiationState::AwaitingAnswer,
            NegotiationState::Answering => NegotiationState::Connected,
            // Failed or closed while the job was in flight.
            _ => {
                return Err(ShareError::StaleSessionDiscarded {
                    peer_id: self.peer_id.clone(),
                    epoch: self.epoch,
                })
            }
        };
        match result {
            Ok(desc) => {
                self.local_description = Some(desc.clone());
                self.transition(next)?;
                Ok(desc)
            }
            Err(e) => Err(self.fail(e.to_string()).await),
        }
    }

    // -----------------------------------------------------------------------
    // Remote side
    // -----------------------------------------------------------------------

    /// Set the remote description (once), then flush buffered candidates in
    /// the order they arrived.
    pub(crate) async fn apply_remote(&mut self, desc: SessionDescription) -> Result<(), ShareError> {
        if self.remote_description.is_some() {
            return Err(ShareError::InvalidTransition {
                peer_id: self.peer_id.clone(),
                from: self.state,
                to: NegotiationState::Connected,
            });
        }
        let transport = self.transport()?;
        transport.set_remote_description(desc.clone()).await?;
        self.remote_description = Some(desc);

        let queued = self.pending_candidates.drain();
        if !queued.is_empty() {
            debug!(
                peer = %self.peer_id,
                epoch = self.epoch,
                count = queued.len(),
                "Flushing buffered candidates"
            );
        }
        for candidate in queued {
            self.apply_candidate(transport.as_ref(), candidate).await;
        }
        Ok(())
    }

    pub(crate) async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if self.state.is_terminal() {
            debug!(peer = %self.peer_id, epoch = self.epoch, "Candidate for ended session dropped");
            return;
        }
        if self.remote_description.is_none() {
            self.pending_candidates.push(candidate);
            debug!(
                peer = %self.peer_id,
                epoch = self.epoch,
                buffered = self.pending_candidates.len(),
                "Candidate buffered until remote description"
            );
            return;
        }
        if let Some(transport) = self.transport.clone() {
            self.apply_candidate(transport.as_ref(), candidate).await;
        }
    }

    async fn apply_candidate(&self, transport: &dyn PeerTransport, candidate: IceCandidate) {
        if let Err(e) = transport.add_candidate(candidate).await {
            warn!(peer = %self.peer_id, epoch = self.epoch, error = %e, "Failed to apply candidate");
        }
    }

    pub(crate) fn adopt_candidates(&mut self, buffer: CandidateBuffer) {
        self.pending_candidates.append(buffer);
    }

    /// Record a connectivity change. A failure moves the session to
    /// `Failed` and returns the error to report.
    pub(crate) async fn on_connectivity(&mut self, state: ConnectivityState) -> Option<ShareError> {
        self.connectivity = state;
        if state.is_failure() && self.is_live() {
            return Some(self.fail(format!("connectivity {}", state.as_str())).await);
        }
        None
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    pub(crate) fn is_stalled(&self, now: Instant, timeout: Duration) -> bool {
        self.state.has_deadline() && now.saturating_duration_since(self.state_since) >= timeout
    }

    /// Move to `Failed` and release the transport.
    pub(crate) async fn fail(&mut self, reason: impl Into<String>) -> ShareError {
        let reason = reason.into();
        if self.is_live() {
            let _ = self.transition(NegotiationState::Failed);
        }
        self.release_transport().await;
        warn!(peer = %self.peer_id, epoch = self.epoch, %reason, "Negotiation failed");
        ShareError::NegotiationFailed {
            peer_id: self.peer_id.clone(),
            reason,
        }
    }

    /// Safe from any state. Returns `false` if the session was already closed.
    pub(crate) async fn close(&mut self) -> bool {
        if self.state == NegotiationState::Closed {
            return false;
        }
        let _ = self.transition(NegotiationState::Closed);
        self.release_transport().await;
        // Mirrors only: the capture owns the tracks.
        self.media_tracks.clear();
        info!(peer = %self.peer_id, epoch = self.epoch, "Session closed");
        true
    }

    async fn release_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.pending_candidates.clear();
    }
}

async fn produce_description(
    transport: &dyn PeerTransport,
    kind: SdpKind,
) -> Result<SessionDescription, TransportError> {
    let desc = match kind {
        SdpKind::Offer => transport.create_offer().await?,
        SdpKind::Answer => transport.create_answer().await?,
    };
    transport.set_local_description(desc.clone()).await?;
    Ok(desc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{harness, FakeFactory, Op};
    use crate::transport::{TransportEventSink, TransportFactory};

    async fn session_with(
        factory: &FakeFactory,
        role: Role,
        sink: TransportEventSink,
    ) -> PeerSession {
        let peer_id = sink.peer_id().clone();
        let epoch = sink.epoch();
        let transport = factory.create(sink).await.unwrap();
        PeerSession::new(peer_id, role, epoch, Some(transport))
    }

    #[tokio::test]
    async fn candidates_before_description_apply_after_it_in_order() {
        let h = harness("host");
        let peer = PeerId::from("v1");
        let mut session = session_with(&h.factory, Role::Sender, h.ctx.links.sink(peer.clone(), 1)).await;

        session.on_remote_candidate(IceCandidate::new("c1")).await;
        session.on_remote_candidate(IceCandidate::new("c2")).await;
        assert_eq!(session.pending_candidates(), 2);
        assert!(h.factory.ops_for(&peer).iter().all(|op| !matches!(op, Op::AddCandidate { .. })));

        session.apply_remote(SessionDescription::answer("d")).await.unwrap();
        session.on_remote_candidate(IceCandidate::new("c3")).await;

        let applied: Vec<Op> = h
            .factory
            .ops_for(&peer)
            .into_iter()
            .filter(|op| matches!(op, Op::SetRemote { .. } | Op::AddCandidate { .. }))
            .collect();
        assert_eq!(
            applied,
            vec![
                Op::SetRemote { peer: peer.clone(), kind: SdpKind::Answer },
                Op::AddCandidate { peer: peer.clone(), candidate: "c1".into() },
                Op::AddCandidate { peer: peer.clone(), candidate: "c2".into() },
                Op::AddCandidate { peer: peer.clone(), candidate: "c3".into() },
            ]
        );
        assert_eq!(session.pending_candidates(), 0);
    }

    #[tokio::test]
    async fn remote_description_is_set_only_once() {
        let h = harness("host");
        let mut session =
            session_with(&h.factory, Role::Sender, h.ctx.links.sink(PeerId::from("v1"), 1)).await;
        session.apply_remote(SessionDescription::answer("d1")).await.unwrap();
        let err = session
            .apply_remote(SessionDescription::answer("d2"))
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::InvalidTransition { .. }));
        assert_eq!(session.remote_description().unwrap().sdp, "d1");
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_once() {
        let h = harness("host");
        let peer = PeerId::from("v1");
        let mut session = session_with(&h.factory, Role::Sender, h.ctx.links.sink(peer.clone(), 4)).await;
        session.on_remote_candidate(IceCandidate::new("early")).await;

        assert!(session.close().await);
        assert!(!session.close().await);
        assert_eq!(session.state(), NegotiationState::Closed);
        assert_eq!(session.pending_candidates(), 0);
        assert_eq!(h.factory.count(|op| matches!(op, Op::Close { .. })), 1);
    }

    #[tokio::test]
    async fn close_from_idle_without_transport() {
        let mut session = PeerSession::new(PeerId::from("s"), Role::Receiver, 1, None);
        assert!(session.close().await);
        assert!(!session.close().await);
    }

    #[tokio::test]
    async fn offer_job_reports_through_outcomes() {
        let mut h = harness("host");
        let peer = PeerId::from("v1");
        let mut session = session_with(&h.factory, Role::Sender, h.ctx.links.sink(peer.clone(), 9)).await;

        session.begin_offer(&h.ctx.links).unwrap();
        assert_eq!(session.state(), NegotiationState::Offering);

        let outcome = h.next_outcome().await;
        assert_eq!(outcome.peer_id, peer);
        assert_eq!(outcome.epoch, 9);
        let desc = session.complete_local(outcome.result).await.unwrap();
        assert_eq!(desc.kind, SdpKind::Offer);
        assert_eq!(session.state(), NegotiationState::AwaitingAnswer);
        assert_eq!(session.local_description(), Some(&desc));
    }

    #[tokio::test]
    async fn failed_description_job_fails_the_session() {
        let h = harness("host");
        let mut session =
            session_with(&h.factory, Role::Sender, h.ctx.links.sink(PeerId::from("v1"), 1)).await;
        session.transition(NegotiationState::Offering).unwrap();

        let err = session
            .complete_local(Err(TransportError::Negotiation("boom".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::NegotiationFailed { .. }));
        assert_eq!(session.state(), NegotiationState::Failed);
        assert_eq!(h.factory.count(|op| matches!(op, Op::Close { .. })), 1);
    }

    #[tokio::test]
    async fn result_after_close_is_stale() {
        let h = harness("host");
        let mut session =
            session_with(&h.factory, Role::Sender, h.ctx.links.sink(PeerId::from("v1"), 1)).await;
        session.transition(NegotiationState::Offering).unwrap();
        session.close().await;

        let err = session
            .complete_local(Ok(SessionDescription::offer("late")))
            .await
            .unwrap_err();
        assert!(matches!(err, ShareError::StaleSessionDiscarded { epoch: 1, .. }));
        assert!(session.local_description().is_none());
    }

    #[tokio::test]
    async fn connectivity_failure_fails_once() {
        let h = harness("host");
        let mut session =
            session_with(&h.factory, Role::Sender, h.ctx.links.sink(PeerId::from("v1"), 1)).await;
        assert!(session.on_connectivity(ConnectivityState::Connecting).await.is_none());
        assert!(session.on_connectivity(ConnectivityState::Failed).await.is_some());
        assert!(session.on_connectivity(ConnectivityState::Disconnected).await.is_none());
        assert_eq!(session.state(), NegotiationState::Failed);
    }

    #[tokio::test]
    async fn stall_detection_respects_deadline_states() {
        let h = harness("host");
        let mut session =
            session_with(&h.factory, Role::Sender, h.ctx.links.sink(PeerId::from("v1"), 1)).await;
        let timeout = Duration::from_secs(30);
        let later = Instant::now() + Duration::from_secs(31);
        assert!(!session.is_stalled(later, timeout));

        session.transition(NegotiationState::Offering).unwrap();
        assert!(!session.is_stalled(Instant::now(), timeout));
        assert!(session.is_stalled(later, timeout));
    }
}
