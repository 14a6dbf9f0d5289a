use std::sync::Arc;
use std::time::Duration;

use spinshare_common::Signal;
use spinshare_config::SpinshareConfig;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::capture::{CaptureConstraints, CaptureEnded, CaptureManager, CaptureSource};
use crate::error::ShareError;
use crate::events::ShareEvent;
use crate::media::TrackId;
use crate::negotiation::{SessionContext, SessionInbox};
use crate::sender::FanoutManager;

use super::EndpointParts;

enum HostCommand {
    StartSharing(oneshot::Sender<Result<Vec<TrackId>, ShareError>>),
    StopSharing(oneshot::Sender<bool>),
    Shutdown,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Control surface for the sharing side. Cheap to clone.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostCommand>,
}

impl HostHandle {
    /// Acquire the screen and offer it to every receiver in the room.
    /// Returns the ids of the captured tracks.
    pub async fn start_sharing(&self) -> Result<Vec<TrackId>, ShareError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostCommand::StartSharing(reply))
            .await
            .map_err(|_| ShareError::EndpointClosed)?;
        rx.await.map_err(|_| ShareError::EndpointClosed)?
    }

    /// Returns `false` if nothing was being shared.
    pub async fn stop_sharing(&self) -> Result<bool, ShareError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(HostCommand::StopSharing(reply))
            .await
            .map_err(|_| ShareError::EndpointClosed)?;
        rx.await.map_err(|_| ShareError::EndpointClosed)
    }

    pub async fn shutdown(&self) {
        let _ = self.tx.send(HostCommand::Shutdown).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

pub struct HostEndpoint {
    fanout: FanoutManager,
    capture: CaptureManager,
    inbox: SessionInbox,
    capture_ended: mpsc::UnboundedReceiver<CaptureEnded>,
    signals: mpsc::Receiver<Signal>,
    commands: mpsc::Receiver<HostCommand>,
    sweep_interval: Duration,
}

impl HostEndpoint {
    pub fn new(
        parts: EndpointParts,
        source: Arc<dyn CaptureSource>,
        config: &SpinshareConfig,
    ) -> (Self, HostHandle, mpsc::Receiver<ShareEvent>) {
        let EndpointParts {
            local_id,
            factory,
            signaling,
            signals,
        } = parts;
        let (ctx, inbox, events) =
            SessionContext::new(local_id, factory, signaling, &config.negotiation);
        let (capture, capture_ended) = CaptureManager::new(
            source,
            CaptureConstraints::from(&config.capture),
            ctx.events.clone(),
        );
        let (tx, commands) = mpsc::channel(32);

        let endpoint = Self {
            fanout: FanoutManager::new(ctx),
            capture,
            inbox,
            capture_ended,
            signals,
            commands,
            sweep_interval: config.negotiation.sweep_interval(),
        };
        (endpoint, HostHandle { tx }, events)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        info!("Host endpoint running");
        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(HostCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                signal = self.signals.recv() => match signal {
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        warn!("Signaling channel closed");
                        break;
                    }
                },
                Some(outcome) = self.inbox.outcomes.recv() => {
                    self.fanout.on_outcome(outcome).await;
                }
                Some(event) = self.inbox.transport.recv() => {
                    self.fanout.on_transport_event(event).await;
                }
                Some(ended) = self.capture_ended.recv() => {
                    self.capture.on_track_ended(ended, &mut self.fanout).await;
                }
                _ = sweep.tick() => {
                    self.fanout.expire_stalled(Instant::now()).await;
                }
            }
        }

        self.capture.stop(&mut self.fanout).await;
        info!("Host endpoint stopped");
    }

    async fn handle_command(&mut self, command: HostCommand) {
        match command {
            HostCommand::StartSharing(reply) => {
                let result = self
                    .capture
                    .start(&mut self.fanout)
                    .await
                    .map(|handle| handle.track_ids());
                let _ = reply.send(result);
            }
            HostCommand::StopSharing(reply) => {
                let stopped = self.capture.stop(&mut self.fanout).await;
                let _ = reply.send(stopped);
            }
            HostCommand::Shutdown => {}
        }
    }

    /// Every inbound signal, routed in one place.
    async fn handle_signal(&mut self, signal: Signal) {
        debug!(event = signal.name(), "Host received signal");
        match signal {
            Signal::PeerJoined { peer_id } => self.fanout.on_receiver_joined(peer_id).await,
            Signal::PeerLeft { peer_id } => self.fanout.on_receiver_left(&peer_id).await,
            Signal::ExistingReceivers { peer_ids } => {
                self.fanout.on_existing_receivers(peer_ids).await
            }
            Signal::RenegotiateRequest { peer_id } => {
                self.fanout.on_renegotiation_requested(peer_id).await
            }
            Signal::Answer {
                from_peer_id,
                description,
                session,
            } => self.fanout.on_answer(from_peer_id, description, session).await,
            Signal::Candidate {
                from_peer_id,
                candidate,
                session,
            } => self.fanout.on_candidate(from_peer_id, candidate, session).await,
            other @ (Signal::Offer { .. }
            | Signal::StopSharing
            | Signal::SenderReconnected
            | Signal::SenderReady) => {
                warn!(event = other.name(), "Unexpected signal on sending side");
            }
        }
    }
}
