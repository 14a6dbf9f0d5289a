//! Public handle for the relay connection.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use spinshare_common::{ClientFrame, PeerId, PeerRole, Recipient, Signal};
use spinshare_config::schema::RelayConfig;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::connection::connection_loop;
use super::SignalingChannel;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RelayClientConfig {
    /// WebSocket URL of the relay.
    pub url: String,
    pub room_id: String,
    pub peer_id: PeerId,
    pub role: PeerRole,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
}

impl RelayClientConfig {
    pub fn from_config(
        relay: &RelayConfig,
        room_id: impl Into<String>,
        peer_id: PeerId,
        role: PeerRole,
    ) -> Self {
        Self {
            url: relay.url.clone(),
            room_id: room_id.into(),
            peer_id,
            role,
            reconnect_delay_secs: relay.reconnect_delay_secs,
            max_reconnect_delay_secs: relay.max_reconnect_delay_secs,
        }
    }

    /// The frame that (re)registers this client with its room.
    pub(crate) fn hello(&self) -> ClientFrame {
        ClientFrame::Hello {
            room_id: self.room_id.clone(),
            peer_id: self.peer_id.clone(),
            role: self.role,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Handle for the relay connection. Cloning shares the connection.
///
/// Sending never blocks; frames sent while disconnected are dropped, which
/// is what an at-most-once channel allows.
#[derive(Clone)]
pub struct RelayClient {
    outbound_tx: mpsc::UnboundedSender<ClientFrame>,
    connected: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl RelayClient {
    /// Start the background connection.
    /// Returns `(client, inbound_signals)`.
    pub fn connect(config: RelayClientConfig) -> (Self, mpsc::Receiver<Signal>) {
        let (signal_tx, signal_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();

        let client = Self {
            outbound_tx,
            connected: Arc::clone(&connected),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(connection_loop(
            config,
            connected,
            signal_tx,
            outbound_rx,
            shutdown,
        ));

        (client, signal_rx)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }
}

impl SignalingChannel for RelayClient {
    fn send(&self, to: Recipient, signal: Signal) {
        if !self.is_connected() {
            debug!(event = signal.name(), "Relay offline, dropping signal");
            return;
        }
        let _ = self.outbound_tx.send(ClientFrame::Signal { to, signal });
    }
}
