//! Configuration schema types for spinshare.
//!
//! All structs use `serde(default)` so partial configs work correctly.

mod capture;
mod ice;
mod negotiation;
mod relay;
mod system;

pub use capture::*;
pub use ice::*;
pub use negotiation::*;
pub use relay::*;
pub use system::*;

use serde::{Deserialize, Serialize};

/// Current config schema version.
pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct SpinshareConfig {
    pub ice: IceConfig,
    pub negotiation: NegotiationConfig,
    pub capture: CaptureConfig,
    pub relay: RelayConfig,
    pub logging: LoggingConfig,
}

// =============================================================================
// Tests
// =============================================================================
