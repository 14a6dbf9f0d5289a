//! Negotiation timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How long a session may sit in a negotiating state, and how often that is checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationConfig {
    /// Seconds before a stalled offer/answer exchange is failed (valid range: 1-600).
    pub timeout_secs: u32,
    /// Milliseconds between stall checks (valid range: 50-60000).
    pub sweep_interval_ms: u32,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            sweep_interval_ms: 1000,
        }
    }
}

impl NegotiationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(u64::from(self.sweep_interval_ms))
    }
}
