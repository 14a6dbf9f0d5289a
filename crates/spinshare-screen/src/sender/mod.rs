//! Sending side: one negotiated session per receiver, all mirroring the
//! current capture.

mod fanout;

pub use fanout::FanoutManager;
