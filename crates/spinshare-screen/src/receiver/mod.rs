//! Receiving side: a single session to the sender and the inbound stream it
//! produces.

mod manager;

pub use manager::ReceiverManager;
