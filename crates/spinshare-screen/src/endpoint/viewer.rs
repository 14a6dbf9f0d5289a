use std::time::Duration;

use spinshare_common::Signal;
use spinshare_config::SpinshareConfig;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ShareError;
use crate::events::ShareEvent;
use crate::media::InboundStream;
use crate::negotiation::{SessionContext, SessionInbox};
use crate::receiver::ReceiverManager;

use super::EndpointParts;

enum ViewerCommand {
    RequestStream(oneshot::Sender<bool>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Control surface for the receiving side. Cheap to clone.
#[derive(Clone)]
pub struct ViewerHandle {
    tx: mpsc::Sender<ViewerCommand>,
    stream: watch::Receiver<Option<InboundStream>>,
}

impl ViewerHandle {
    /// Ask the sender for a session. `Ok(false)` if one is already live or
    /// requested.
    pub async fn request_stream(&self) -> Result<bool, ShareError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ViewerCommand::RequestStream(reply))
            .await
            .map_err(|_| ShareError::EndpointClosed)?;
        rx.await.map_err(|_| ShareError::EndpointClosed)
    }

    /// The inbound stream as it accumulates tracks; `None` while nothing is
    /// being received.
    pub fn stream(&self) -> watch::Receiver<Option<InboundStream>> {
        self.stream.clone()
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(ViewerCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

pub struct ViewerEndpoint {
    receiver: ReceiverManager,
    inbox: SessionInbox,
    signals: mpsc::Receiver<Signal>,
    commands: mpsc::Receiver<ViewerCommand>,
    sweep_interval: Duration,
}

impl ViewerEndpoint {
    pub fn new(
        parts: EndpointParts,
        config: &SpinshareConfig,
    ) -> (Self, ViewerHandle, mpsc::Receiver<ShareEvent>) {
        let EndpointParts {
            local_id,
            factory,
            signaling,
            signals,
        } = parts;
        let (ctx, inbox, events) =
            SessionContext::new(local_id, factory, signaling, &config.negotiation);
        let receiver = ReceiverManager::new(ctx);
        let (tx, commands) = mpsc::channel(32);
        let handle = ViewerHandle {
            tx,
            stream: receiver.stream(),
        };

        let endpoint = Self {
            receiver,
            inbox,
            signals,
            commands,
            sweep_interval: config.negotiation.sweep_interval(),
        };
        (endpoint, handle, events)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until shutdown. Asks for the stream on start: nothing local
    /// survives a restart, but the sender may still think we are connected.
    pub async fn run(mut self) {
        info!("Viewer endpoint running");
        self.receiver.request_stream().await;

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(ViewerCommand::RequestStream(reply)) => {
                        let sent = self.receiver.request_stream().await;
                        let _ = reply.send(sent);
                    }
                    Some(ViewerCommand::Shutdown) | None => break,
                },
                signal = self.signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        warn!("Signaling channel closed");
                        break;
                    }
                },
                Some(outcome) = self.inbox.outcomes.recv() => {
                    self.receiver.on_outcome(outcome).await;
                }
                Some(event) = self.inbox.transport.recv() => {
                    self.receiver.on_transport_event(event).await;
                }
                _ = sweep.tick() => {
                    self.receiver.expire_stalled(Instant::now()).await;
                }
            }
        }

        self.receiver.close().await;
        info!("Viewer endpoint stopped");
    }

    /// Every inbound signal, routed in one place.
    async fn handle_signal(&mut self, signal: Signal) {
        debug!(event = signal.name(), "Viewer received signal");
        match signal {
            Signal::Offer {
                from_peer_id,
                description,
                session,
            } => self.receiver.on_offer(from_peer_id, description, session).await,
            Signal::Candidate {
                from_peer_id,
                candidate,
                session,
            } => self.receiver.on_candidate(from_peer_id, candidate, session).await,
            Signal::StopSharing => self.receiver.on_sender_stopped().await,
            Signal::SenderReconnected => self.receiver.on_sender_reconnected().await,
            // The relay answers readiness with existing-receivers on the
            // sending side; nothing to do here.
            Signal::SenderReady => debug!("Sender is ready"),
            other @ (Signal::PeerJoined { .. }
            | Signal::PeerLeft { .. }
            | Signal::Answer { .. }
            | Signal::RenegotiateRequest { .. }
            | Signal::ExistingReceivers { .. }) => {
                warn!(event = other.name(), "Unexpected signal on receiving side");
            }
        }
    }
}
