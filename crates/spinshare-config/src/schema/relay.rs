use serde::{Deserialize, Serialize};

/// Configuration for the signaling relay, both client and server side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// WebSocket URL clients connect to.
    pub url: String,
    /// Port the relay server listens on.
    pub listen_port: u16,
    /// Reconnect base delay in seconds.
    pub reconnect_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub max_reconnect_delay_secs: u64,
    /// Rooms without a sender older than this are reaped (seconds).
    pub room_ttl_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:3003/ws".into(),
            listen_port: 3003,
            reconnect_delay_secs: 1,
            max_reconnect_delay_secs: 30,
            room_ttl_secs: 300,
        }
    }
}
