//! Room store: one sender and any number of receivers per room id.
//!
//! The store owns each member's outbound channel. Dropping a member's
//! channel ends its connection task, which is how replaced members and
//! reaped rooms get disconnected.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use spinshare_common::{PeerId, PeerRole, Recipient, RelayFrame, Signal};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("peer id {0} is already in use in this room")]
    PeerIdTaken(PeerId),

    #[error("{0} is generated by the relay and cannot be sent")]
    Reserved(&'static str),

    #[error("only the sender may send {0}")]
    NotSender(&'static str),

    #[error("room {0} not found")]
    UnknownRoom(String),
}

/// One connected client.
struct Member {
    peer_id: PeerId,
    conn_id: u64,
    tx: mpsc::Sender<RelayFrame>,
}

struct Room {
    sender: Option<Member>,
    receivers: BTreeMap<PeerId, Member>,
    created_at: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            sender: None,
            receivers: BTreeMap::new(),
            created_at: Instant::now(),
        }
    }

    fn is_empty(&self) -> bool {
        self.sender.is_none() && self.receivers.is_empty()
    }

    fn receiver_ids(&self) -> Vec<PeerId> {
        self.receivers.keys().cloned().collect()
    }

    fn member(&self, peer_id: &PeerId) -> Option<&Member> {
        match &self.sender {
            Some(sender) if &sender.peer_id == peer_id => Some(sender),
            _ => self.receivers.get(peer_id),
        }
    }
}

/// Frames to hand out once the store lock is released.
type Deliveries = Vec<(mpsc::Sender<RelayFrame>, RelayFrame)>;

fn from_relay(signal: Signal) -> RelayFrame {
    RelayFrame::Signal { from: None, signal }
}

/// Overwrite the identity fields a client could spoof with the identity it
/// authenticated as in its hello.
fn stamp(signal: Signal, from: &PeerId) -> Signal {
    match signal {
        Signal::Offer {
            description,
            session,
            ..
        } => Signal::Offer {
            from_peer_id: from.clone(),
            description,
            session,
        },
        Signal::Answer {
            description,
            session,
            ..
        } => Signal::Answer {
            from_peer_id: from.clone(),
            description,
            session,
        },
        Signal::Candidate {
            candidate, session, ..
        } => Signal::Candidate {
            from_peer_id: from.clone(),
            candidate,
            session,
        },
        Signal::RenegotiateRequest { .. } => Signal::RenegotiateRequest {
            peer_id: from.clone(),
        },
        other => other,
    }
}

async fn deliver(deliveries: Deliveries) -> usize {
    let mut delivered = 0;
    for (tx, frame) in deliveries {
        if tx.send(frame).await.is_ok() {
            delivered += 1;
        } else {
            debug!("Member channel closed before delivery");
        }
    }
    delivered
}

/// Thread-safe room store.
#[derive(Clone, Default)]
pub struct RoomStore {
    rooms: Arc<RwLock<HashMap<String, Room>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member, creating the room on first use.
    ///
    /// A sender replaces any previous sender; if receivers are already
    /// waiting, the sender learns about them and each of them is told the
    /// sender came back. A receiver is announced to the sender. A receiver
    /// reusing its own id replaces its older connection.
    pub async fn join(
        &self,
        room_id: &str,
        peer_id: PeerId,
        role: PeerRole,
        conn_id: u64,
        tx: mpsc::Sender<RelayFrame>,
    ) -> Result<(), RoomError> {
        let mut deliveries = Deliveries::new();
        {
            let mut rooms = self.rooms.write().await;
            let room = rooms.entry(room_id.to_string()).or_insert_with(Room::new);
            let member = Member {
                peer_id: peer_id.clone(),
                conn_id,
                tx,
            };

            match role {
                PeerRole::Sender => {
                    if room.receivers.contains_key(&peer_id) {
                        return Err(RoomError::PeerIdTaken(peer_id));
                    }
                    if let Some(old) = room.sender.take() {
                        info!(room = %room_id, old = %old.peer_id, new = %peer_id, "Sender replaced");
                        deliveries.push((
                            old.tx,
                            RelayFrame::Error {
                                message: RelayFrame::SENDER_REPLACED.into(),
                            },
                        ));
                    }
                    if !room.receivers.is_empty() {
                        deliveries.push((
                            member.tx.clone(),
                            from_relay(Signal::ExistingReceivers {
                                peer_ids: room.receiver_ids(),
                            }),
                        ));
                        for receiver in room.receivers.values() {
                            deliveries
                                .push((receiver.tx.clone(), from_relay(Signal::SenderReconnected)));
                        }
                    }
                    room.sender = Some(member);
                }
                PeerRole::Receiver => {
                    if room.sender.as_ref().is_some_and(|s| s.peer_id == peer_id) {
                        return Err(RoomError::PeerIdTaken(peer_id));
                    }
                    if let Some(old) = room.receivers.insert(peer_id.clone(), member) {
                        debug!(room = %room_id, peer = %peer_id, conn = old.conn_id, "Receiver connection replaced");
                    }
                    if let Some(sender) = &room.sender {
                        deliveries.push((
                            sender.tx.clone(),
                            from_relay(Signal::PeerJoined { peer_id }),
                        ));
                    }
                }
            }
        }
        deliver(deliveries).await;
        Ok(())
    }

    /// Forward a client signal. Returns how many members it reached.
    ///
    /// `sender-ready` is answered by the relay with the room's receivers
    /// instead of being forwarded.
    pub async fn route(
        &self,
        room_id: &str,
        from: &PeerId,
        role: PeerRole,
        to: Recipient,
        signal: Signal,
    ) -> Result<usize, RoomError> {
        match &signal {
            Signal::PeerJoined { .. }
            | Signal::PeerLeft { .. }
            | Signal::ExistingReceivers { .. }
            | Signal::SenderReconnected => return Err(RoomError::Reserved(signal.name())),
            Signal::SenderReady | Signal::StopSharing if role != PeerRole::Sender => {
                return Err(RoomError::NotSender(signal.name()));
            }
            _ => {}
        }

        let deliveries = {
            let rooms = self.rooms.read().await;
            let room = rooms
                .get(room_id)
                .ok_or_else(|| RoomError::UnknownRoom(room_id.to_string()))?;

            if signal == Signal::SenderReady {
                let sender = room.member(from).map(|m| m.tx.clone());
                sender
                    .map(|tx| {
                        vec![(
                            tx,
                            from_relay(Signal::ExistingReceivers {
                                peer_ids: room.receiver_ids(),
                            }),
                        )]
                    })
                    .unwrap_or_default()
            } else {
                let frame = RelayFrame::Signal {
                    from: Some(from.clone()),
                    signal: stamp(signal, from),
                };
                let targets: Vec<&Member> = match &to {
                    Recipient::Peer(peer_id) => room.member(peer_id).into_iter().collect(),
                    Recipient::Sender => room.sender.iter().collect(),
                    Recipient::Room => room
                        .sender
                        .iter()
                        .chain(room.receivers.values())
                        .filter(|m| &m.peer_id != from)
                        .collect(),
                };
                if targets.is_empty() {
                    debug!(room = %room_id, from = %from, to = ?to, "No recipient for signal");
                }
                targets
                    .into_iter()
                    .map(|m| (m.tx.clone(), frame.clone()))
                    .collect()
            }
        };
        Ok(deliver(deliveries).await)
    }

    /// Remove a member. A stale `conn_id` (the member was already replaced)
    /// is ignored. Returns true if the room was removed.
    pub async fn leave(&self, room_id: &str, peer_id: &PeerId, role: PeerRole, conn_id: u64) -> bool {
        let mut deliveries = Deliveries::new();
        let removed = {
            let mut rooms = self.rooms.write().await;
            let Some(room) = rooms.get_mut(room_id) else {
                return false;
            };
            match role {
                PeerRole::Sender => {
                    if room
                        .sender
                        .as_ref()
                        .is_some_and(|s| &s.peer_id == peer_id && s.conn_id == conn_id)
                    {
                        room.sender = None;
                    }
                }
                PeerRole::Receiver => {
                    if room.receivers.get(peer_id).is_some_and(|m| m.conn_id == conn_id) {
                        room.receivers.remove(peer_id);
                        if let Some(sender) = &room.sender {
                            deliveries.push((
                                sender.tx.clone(),
                                from_relay(Signal::PeerLeft {
                                    peer_id: peer_id.clone(),
                                }),
                            ));
                        }
                    }
                }
            }
            if room.is_empty() {
                rooms.remove(room_id);
                true
            } else {
                false
            }
        };
        deliver(deliveries).await;
        removed
    }

    /// Drop rooms older than `max_age` that have no sender. Their receivers'
    /// connections close. Returns how many rooms were reaped.
    pub async fn reap_stale(&self, max_age: Duration) -> usize {
        let mut rooms = self.rooms.write().await;
        let before = rooms.len();
        let now = Instant::now();
        rooms.retain(|id, room| {
            let stale = room.sender.is_none() && now.duration_since(room.created_at) > max_age;
            if stale {
                info!(room = %id, receivers = room.receivers.len(), "Reaping stale room");
            }
            !stale
        });
        before - rooms.len()
    }

    #[cfg(test)]
    pub async fn exists(&self, room_id: &str) -> bool {
        self.rooms.read().await.contains_key(room_id)
    }

    /// Number of live rooms.
    pub async fn count(&self) -> usize {
        self.rooms.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinshare_common::{IceCandidate, SessionDescription};

    const ROOM: &str = "room-1";

    struct Client {
        id: PeerId,
        role: PeerRole,
        conn: u64,
        rx: mpsc::Receiver<RelayFrame>,
    }

    async fn join(store: &RoomStore, id: &str, role: PeerRole, conn: u64) -> Client {
        let (tx, rx) = mpsc::channel(16);
        store
            .join(ROOM, PeerId::from(id), role, conn, tx)
            .await
            .unwrap();
        Client {
            id: PeerId::from(id),
            role,
            conn,
            rx,
        }
    }

    fn drain(client: &mut Client) -> Vec<RelayFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = client.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    fn relay_signal(signal: Signal) -> RelayFrame {
        RelayFrame::Signal { from: None, signal }
    }

    #[tokio::test]
    async fn receiver_join_and_leave_are_announced_to_the_sender() {
        let store = RoomStore::new();
        let mut host = join(&store, "host", PeerRole::Sender, 1).await;
        let viewer = join(&store, "viewer", PeerRole::Receiver, 2).await;

        assert!(!store.leave(ROOM, &viewer.id, viewer.role, viewer.conn).await);
        assert_eq!(
            drain(&mut host),
            vec![
                relay_signal(Signal::PeerJoined {
                    peer_id: viewer.id.clone()
                }),
                relay_signal(Signal::PeerLeft {
                    peer_id: viewer.id.clone()
                }),
            ]
        );
    }

    #[tokio::test]
    async fn sender_arriving_late_learns_receivers_and_they_are_told() {
        let store = RoomStore::new();
        let mut a = join(&store, "viewer-a", PeerRole::Receiver, 1).await;
        let mut b = join(&store, "viewer-b", PeerRole::Receiver, 2).await;
        let mut host = join(&store, "host", PeerRole::Sender, 3).await;

        assert_eq!(
            drain(&mut host),
            vec![relay_signal(Signal::ExistingReceivers {
                peer_ids: vec![a.id.clone(), b.id.clone()]
            })]
        );
        assert_eq!(drain(&mut a), vec![relay_signal(Signal::SenderReconnected)]);
        assert_eq!(drain(&mut b), vec![relay_signal(Signal::SenderReconnected)]);
    }

    #[tokio::test]
    async fn sender_into_an_empty_room_hears_nothing() {
        let store = RoomStore::new();
        let mut host = join(&store, "host", PeerRole::Sender, 1).await;
        assert!(drain(&mut host).is_empty());
    }

    #[tokio::test]
    async fn second_sender_replaces_the_first() {
        let store = RoomStore::new();
        let mut old = join(&store, "host", PeerRole::Sender, 1).await;
        let mut new = join(&store, "host", PeerRole::Sender, 2).await;

        assert!(old.rx.recv().await.unwrap().is_sender_replaced());
        // The store dropped the old channel.
        assert!(old.rx.recv().await.is_none());

        // The old connection cleaning up must not evict its replacement.
        assert!(!store.leave(ROOM, &old.id, old.role, old.conn).await);
        let viewer = join(&store, "viewer", PeerRole::Receiver, 3).await;
        assert_eq!(
            drain(&mut new),
            vec![relay_signal(Signal::PeerJoined { peer_id: viewer.id })]
        );
    }

    #[tokio::test]
    async fn receiver_cannot_take_the_senders_id() {
        let store = RoomStore::new();
        let _host = join(&store, "host", PeerRole::Sender, 1).await;
        let (tx, _rx) = mpsc::channel(1);
        let err = store
            .join(ROOM, PeerId::from("host"), PeerRole::Receiver, 2, tx)
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::PeerIdTaken(PeerId::from("host")));
    }

    #[tokio::test]
    async fn routing_by_recipient() {
        let store = RoomStore::new();
        let mut host = join(&store, "host", PeerRole::Sender, 1).await;
        let mut a = join(&store, "viewer-a", PeerRole::Receiver, 2).await;
        let mut b = join(&store, "viewer-b", PeerRole::Receiver, 3).await;
        drain(&mut host);

        let offer = Signal::Offer {
            from_peer_id: host.id.clone(),
            description: SessionDescription::offer("v=0"),
            session: Some(3),
        };
        let reached = store
            .route(ROOM, &host.id, host.role, Recipient::Peer(a.id.clone()), offer.clone())
            .await
            .unwrap();
        assert_eq!(reached, 1);
        assert_eq!(
            drain(&mut a),
            vec![RelayFrame::Signal {
                from: Some(host.id.clone()),
                signal: offer
            }]
        );
        assert!(drain(&mut b).is_empty());

        let request = Signal::RenegotiateRequest {
            peer_id: b.id.clone(),
        };
        let reached = store
            .route(ROOM, &b.id, b.role, Recipient::Sender, request.clone())
            .await
            .unwrap();
        assert_eq!(reached, 1);
        assert_eq!(drain(&mut host).len(), 1);

        let reached = store
            .route(ROOM, &host.id, host.role, Recipient::Room, Signal::StopSharing)
            .await
            .unwrap();
        assert_eq!(reached, 2);
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(drain(&mut b).len(), 1);
        assert!(drain(&mut host).is_empty());
    }

    #[tokio::test]
    async fn forwarded_signals_carry_the_authenticated_identity() {
        let store = RoomStore::new();
        let mut host = join(&store, "host", PeerRole::Sender, 1).await;
        let viewer = join(&store, "viewer", PeerRole::Receiver, 2).await;
        drain(&mut host);

        let spoofed = Signal::Candidate {
            from_peer_id: PeerId::from("someone-else"),
            candidate: IceCandidate::new("candidate:1"),
            session: Some(4),
        };
        store
            .route(ROOM, &viewer.id, viewer.role, Recipient::Sender, spoofed)
            .await
            .unwrap();
        assert_eq!(
            drain(&mut host),
            vec![RelayFrame::Signal {
                from: Some(viewer.id.clone()),
                signal: Signal::Candidate {
                    from_peer_id: viewer.id.clone(),
                    candidate: IceCandidate::new("candidate:1"),
                    session: Some(4),
                },
            }]
        );
    }

    #[tokio::test]
    async fn sender_ready_is_answered_not_forwarded() {
        let store = RoomStore::new();
        let mut host = join(&store, "host", PeerRole::Sender, 1).await;
        let mut viewer = join(&store, "viewer", PeerRole::Receiver, 2).await;
        drain(&mut host);

        store
            .route(ROOM, &host.id, host.role, Recipient::Room, Signal::SenderReady)
            .await
            .unwrap();
        assert_eq!(
            drain(&mut host),
            vec![relay_signal(Signal::ExistingReceivers {
                peer_ids: vec![viewer.id.clone()]
            })]
        );
        assert!(drain(&mut viewer).is_empty());
    }

    #[tokio::test]
    async fn membership_signals_are_reserved() {
        let store = RoomStore::new();
        let viewer = join(&store, "viewer", PeerRole::Receiver, 1).await;
        let err = store
            .route(
                ROOM,
                &viewer.id,
                viewer.role,
                Recipient::Room,
                Signal::PeerLeft {
                    peer_id: PeerId::from("host"),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::Reserved("peer-left"));

        let err = store
            .route(ROOM, &viewer.id, viewer.role, Recipient::Room, Signal::StopSharing)
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::NotSender("stop-sharing"));
    }

    #[tokio::test]
    async fn unknown_recipient_reaches_nobody() {
        let store = RoomStore::new();
        let host = join(&store, "host", PeerRole::Sender, 1).await;
        let reached = store
            .route(
                ROOM,
                &host.id,
                host.role,
                Recipient::Peer(PeerId::from("ghost")),
                Signal::StopSharing,
            )
            .await
            .unwrap();
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn empty_rooms_are_removed() {
        let store = RoomStore::new();
        let host = join(&store, "host", PeerRole::Sender, 1).await;
        let viewer = join(&store, "viewer", PeerRole::Receiver, 2).await;
        assert!(!store.leave(ROOM, &host.id, host.role, host.conn).await);
        assert!(store.exists(ROOM).await);
        assert!(store.leave(ROOM, &viewer.id, viewer.role, viewer.conn).await);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn reaper_drops_only_senderless_rooms() {
        let store = RoomStore::new();
        let mut viewer = join(&store, "viewer", PeerRole::Receiver, 1).await;
        let (tx, _host_rx) = mpsc::channel(1);
        store
            .join("hosted", PeerId::from("host"), PeerRole::Sender, 2, tx)
            .await
            .unwrap();

        assert_eq!(store.reap_stale(Duration::from_secs(60)).await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.reap_stale(Duration::from_millis(10)).await, 1);

        assert!(!store.exists(ROOM).await);
        assert!(store.exists("hosted").await);
        assert!(viewer.rx.recv().await.is_none());
    }
}
