//! Endpoint drivers: the single event loop per side.
//!
//! Each endpoint owns its managers outright and is the only thing that
//! touches them. Inbound signals, finished negotiation jobs, transport
//! callbacks, control commands and the stall sweep all funnel into one
//! `tokio::select!`, so handlers run to completion one at a time.

mod host;
mod viewer;

use std::sync::Arc;

use spinshare_common::{PeerId, PeerRole, Signal};
use spinshare_config::SpinshareConfig;
use tokio::sync::mpsc;

use crate::signaling::{RelayClient, RelayClientConfig, SignalingChannel};
use crate::transport::TransportFactory;

pub use host::{HostEndpoint, HostHandle};
pub use viewer::{ViewerEndpoint, ViewerHandle};

/// What every endpoint is built from.
pub struct EndpointParts {
    pub local_id: PeerId,
    pub factory: Arc<dyn TransportFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub signals: mpsc::Receiver<Signal>,
}

impl EndpointParts {
    /// Connect to the configured relay and use it as the signaling channel.
    pub fn over_relay(
        config: &SpinshareConfig,
        room_id: impl Into<String>,
        local_id: PeerId,
        role: PeerRole,
        factory: Arc<dyn TransportFactory>,
    ) -> (Self, RelayClient) {
        let relay_config = RelayClientConfig::from_config(&config.relay, room_id, local_id.clone(), role);
        let (client, signals) = RelayClient::connect(relay_config);
        let parts = Self {
            local_id,
            factory,
            signaling: Arc::new(client.clone()),
            signals,
        };
        (parts, client)
    }
}
