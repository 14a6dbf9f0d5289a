//! Scripted fakes shared by the unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use spinshare_common::{IceCandidate, PeerId, Recipient, SdpKind, SessionDescription, Signal};
use spinshare_config::schema::NegotiationConfig;
use tokio::sync::{mpsc, Semaphore};

use crate::capture::{CaptureConstraints, CaptureSource};
use crate::error::{CaptureError, TransportError};
use crate::events::ShareEvent;
use crate::media::{CaptureHandle, MediaTrack, RemoteTrack, TrackKind};
use crate::negotiation::{NegotiationOutcome, SessionContext, SessionInbox};
use crate::signaling::{Outbound, SignalingChannel};
use crate::transport::{PeerTransport, TransportEvent, TransportEventSink, TransportFactory};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Everything a fake transport was asked to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Create { peer: PeerId, epoch: u64 },
    AddTrack { peer: PeerId, track: String },
    CreateOffer { peer: PeerId },
    CreateAnswer { peer: PeerId },
    SetLocal { peer: PeerId, kind: SdpKind },
    SetRemote { peer: PeerId, kind: SdpKind },
    AddCandidate { peer: PeerId, candidate: String },
    Close { peer: PeerId, epoch: u64 },
}

impl Op {
    pub fn peer(&self) -> &PeerId {
        match self {
            Self::Create { peer, .. }
            | Self::AddTrack { peer, .. }
            | Self::CreateOffer { peer }
            | Self::CreateAnswer { peer }
            | Self::SetLocal { peer, .. }
            | Self::SetRemote { peer, .. }
            | Self::AddCandidate { peer, .. }
            | Self::Close { peer, .. } => peer,
        }
    }
}

type OpLog = Arc<Mutex<Vec<Op>>>;

#[derive(Default)]
pub struct FakeFactory {
    log: OpLog,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fail_next: AtomicBool,
    trickle: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Offers from transports created after this call block until the
    /// returned semaphore is given permits.
    pub fn hold_offers(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Emit one local candidate after each local description is set.
    pub fn trickle(&self, on: bool) {
        self.trickle.store(on, Ordering::SeqCst);
    }

    pub fn ops(&self) -> Vec<Op> {
        self.log.lock().unwrap().clone()
    }

    pub fn ops_for(&self, peer: &PeerId) -> Vec<Op> {
        self.ops().into_iter().filter(|op| op.peer() == peer).collect()
    }

    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|op| pred(op)).count()
    }

    pub fn created(&self, peer: &PeerId) -> usize {
        self.count(|op| matches!(op, Op::Create { peer: p, .. } if p == peer))
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        sink: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TransportError::Create("scripted failure".into()));
        }
        self.log.lock().unwrap().push(Op::Create {
            peer: sink.peer_id().clone(),
            epoch: sink.epoch(),
        });
        Ok(Arc::new(FakeTransport {
            log: self.log.clone(),
            gate: self.gate.lock().unwrap().clone(),
            trickle: self.trickle.load(Ordering::SeqCst),
            remote_set: AtomicBool::new(false),
            tracks: Mutex::new(Vec::new()),
            sink,
        }))
    }
}

/// The offer SDP lists the mirrored tracks (`tracks=video:id,audio:id`) so
/// the answering fake can surface them as remote tracks.
pub struct FakeTransport {
    log: OpLog,
    gate: Option<Arc<Semaphore>>,
    trickle: bool,
    remote_set: AtomicBool,
    tracks: Mutex<Vec<MediaTrack>>,
    sink: TransportEventSink,
}

impl FakeTransport {
    fn peer(&self) -> PeerId {
        self.sink.peer_id().clone()
    }

    fn record(&self, op: Op) {
        self.log.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.record(Op::CreateOffer { peer: self.peer() });
        let tracks: Vec<String> = self
            .tracks
            .lock()
            .unwrap()
            .iter()
            .map(|t| format!("{}:{}", t.kind().as_str(), t.id()))
            .collect();
        Ok(SessionDescription::offer(format!("tracks={}", tracks.join(","))))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.record(Op::CreateAnswer { peer: self.peer() });
        Ok(SessionDescription::answer(format!("answer-to-{}", self.peer())))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.record(Op::SetLocal {
            peer: self.peer(),
            kind: desc.kind,
        });
        if self.trickle {
            self.sink
                .local_candidate(IceCandidate::new(format!("local-{}", self.peer())));
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.record(Op::SetRemote {
            peer: self.peer(),
            kind: desc.kind,
        });
        self.remote_set.store(true, Ordering::SeqCst);

        if desc.kind == SdpKind::Offer {
            let stream_id = format!("{}-stream", self.peer());
            let listed = desc.sdp.strip_prefix("tracks=").unwrap_or_default();
            for entry in listed.split(',').filter(|e| !e.is_empty()) {
                let Some((kind, id)) = entry.split_once(':') else {
                    continue;
                };
                let Some(kind) = TrackKind::parse(kind) else {
                    continue;
                };
                self.sink
                    .remote_track(stream_id.clone(), RemoteTrack::new(id, kind));
            }
        }
        Ok(())
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(TransportError::Candidate("no remote description".into()));
        }
        self.record(Op::AddCandidate {
            peer: self.peer(),
            candidate: candidate.candidate,
        });
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), TransportError> {
        self.record(Op::AddTrack {
            peer: self.peer(),
            track: track.id().to_string(),
        });
        self.tracks.lock().unwrap().push(track.clone());
        Ok(())
    }

    async fn close(&self) {
        self.record(Op::Close {
            peer: self.peer(),
            epoch: self.sink.epoch(),
        });
    }
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Outbound>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    pub fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn count(&self, name: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|out| out.signal.name() == name)
            .count()
    }

    pub fn to_peer(&self, peer: &PeerId) -> Vec<Signal> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|out| matches!(&out.to, Recipient::Peer(p) if p == peer))
            .map(|out| out.signal.clone())
            .collect()
    }
}

impl SignalingChannel for RecordingChannel {
    fn send(&self, to: Recipient, signal: Signal) {
        self.sent.lock().unwrap().push(Outbound { to, signal });
    }
}

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeCaptureSource {
    deny: AtomicBool,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl FakeCaptureSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, on: bool) {
        self.deny.store(on, Ordering::SeqCst);
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureSource for FakeCaptureSource {
    async fn acquire(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<CaptureHandle, CaptureError> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(CaptureError::Denied("permission denied".into()));
        }
        let n = self.acquired.fetch_add(1, Ordering::SeqCst) + 1;
        let mut tracks = vec![MediaTrack::video(format!("screen-{n}"))];
        if constraints.audio {
            tracks.push(MediaTrack::audio(format!("audio-{n}")));
        }
        Ok(CaptureHandle::new(format!("capture-{n}"), tracks))
    }

    async fn release(&self, _handle: &CaptureHandle) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub ctx: SessionContext,
    pub inbox: SessionInbox,
    pub events: mpsc::Receiver<ShareEvent>,
    pub channel: Arc<RecordingChannel>,
    pub factory: Arc<FakeFactory>,
}

pub fn harness(local: &str) -> Harness {
    harness_with(local, FakeFactory::new())
}

pub fn harness_with(local: &str, factory: Arc<FakeFactory>) -> Harness {
    let channel = Arc::new(RecordingChannel::default());
    let (ctx, inbox, events) = SessionContext::new(
        PeerId::from(local),
        factory.clone(),
        channel.clone(),
        &NegotiationConfig::default(),
    );
    Harness {
        ctx,
        inbox,
        events,
        channel,
        factory,
    }
}

impl Harness {
    pub async fn next_outcome(&mut self) -> NegotiationOutcome {
        tokio::time::timeout(Duration::from_secs(1), self.inbox.outcomes.recv())
            .await
            .expect("no negotiation outcome within 1s")
            .expect("outcome channel closed")
    }

    pub fn drain_transport(&mut self) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.inbox.transport.try_recv() {
            out.push(event);
        }
        out
    }

    pub fn drain_events(&mut self) -> Vec<ShareEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            out.push(event);
        }
        out
    }
}
