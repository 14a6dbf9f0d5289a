//! Capture lifecycle: acquiring the local screen source, binding it to the
//! fan-out, and tearing it down through one path whatever triggered it.

mod lifecycle;
mod source;

pub use lifecycle::{CaptureEnded, CaptureManager};
pub use source::{CaptureConstraints, CaptureSource};
