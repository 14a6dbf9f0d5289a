pub mod errors;
pub mod id;
pub mod protocol;

pub use errors::{ConfigError, ProtocolError, SpinshareError};
pub use id::{new_correlation_id, new_id, PeerId};
pub use protocol::{
    ClientFrame, IceCandidate, PeerRole, Recipient, RelayFrame, SdpKind, SessionDescription,
    Signal,
};

pub type Result<T> = std::result::Result<T, SpinshareError>;
