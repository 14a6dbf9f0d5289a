use async_trait::async_trait;
use spinshare_config::schema::{CaptureConfig, DisplaySurface};

use crate::error::CaptureError;
use crate::media::CaptureHandle;

/// What to ask the platform for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub max_width: u32,
    pub max_height: u32,
    pub max_fps: u32,
    pub display_surface: DisplaySurface,
    pub audio: bool,
}

impl From<&CaptureConfig> for CaptureConstraints {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            max_width: config.quality.max_width(),
            max_height: config.quality.max_height(),
            max_fps: config.quality.max_fps(),
            display_surface: config.display_surface,
            audio: config.audio,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

/// Platform screen capture.
///
/// `acquire` typically shows the OS picker; a user dismissing it is
/// [`CaptureError::Cancelled`]. The returned tracks are ended by the platform
/// when the user hits its own "stop sharing" control.
#[async_trait]
pub trait CaptureSource: Send + Sync {
    async fn acquire(&self, constraints: &CaptureConstraints)
        -> Result<CaptureHandle, CaptureError>;

    /// Free platform resources behind `handle`. Called once per handle,
    /// after its tracks have been stopped.
    async fn release(&self, handle: &CaptureHandle);
}
