//! Signaling channel seam and the relay WebSocket client.
//!
//! The core only ever *sends* through [`SignalingChannel`]; inbound signals
//! arrive as a plain `mpsc::Receiver<Signal>` consumed by the endpoint loop.
//! Sending is fire-and-forget: the channel is at-most-once and unordered,
//! and the negotiation logic is written to tolerate exactly that.

mod client;
mod connection;

use spinshare_common::{Recipient, Signal};
use tokio::sync::mpsc;

pub use client::{RelayClient, RelayClientConfig};

pub trait SignalingChannel: Send + Sync {
    fn send(&self, to: Recipient, signal: Signal);
}

/// A signal on its way out.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Recipient,
    pub signal: Signal,
}

impl SignalingChannel for mpsc::UnboundedSender<Outbound> {
    fn send(&self, to: Recipient, signal: Signal) {
        let _ = mpsc::UnboundedSender::send(self, Outbound { to, signal });
    }
}
