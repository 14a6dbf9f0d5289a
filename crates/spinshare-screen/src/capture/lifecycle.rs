use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::ShareError;
use crate::events::{publish, ShareEvent};
use crate::media::CaptureHandle;
use crate::sender::FanoutManager;

use super::source::{CaptureConstraints, CaptureSource};

/// The primary track of capture `generation` ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureEnded {
    pub generation: u64,
}

// ---------------------------------------------------------------------------
// Capture Manager
// ---------------------------------------------------------------------------

/// Sole owner of the capture handle. Sessions only mirror its tracks; this
/// is the one place tracks get stopped.
pub struct CaptureManager {
    source: Arc<dyn CaptureSource>,
    constraints: CaptureConstraints,
    events: mpsc::Sender<ShareEvent>,
    ended_tx: mpsc::UnboundedSender<CaptureEnded>,
    handle: Option<Arc<CaptureHandle>>,
    /// Bumped per acquired capture so a late end notification for an
    /// earlier capture cannot stop the current one.
    generation: u64,
}

impl CaptureManager {
    pub fn new(
        source: Arc<dyn CaptureSource>,
        constraints: CaptureConstraints,
        events: mpsc::Sender<ShareEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<CaptureEnded>) {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let mgr = Self {
            source,
            constraints,
            events,
            ended_tx,
            handle: None,
            generation: 0,
        };
        (mgr, ended_rx)
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    pub fn handle(&self) -> Option<&Arc<CaptureHandle>> {
        self.handle.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Acquire the screen and bind it to `fanout`. Already capturing returns
    /// the current handle. A refusal leaves everything as it was.
    pub async fn start(
        &mut self,
        fanout: &mut FanoutManager,
    ) -> Result<Arc<CaptureHandle>, ShareError> {
        if let Some(handle) = &self.handle {
            debug!(capture = handle.id(), "Capture already active");
            return Ok(handle.clone());
        }

        let handle = match self.source.acquire(&self.constraints).await {
            Ok(handle) => Arc::new(handle),
            Err(e) => {
                warn!(error = %e, "Screen capture refused");
                let err = ShareError::from(e);
                publish(
                    &self.events,
                    ShareEvent::CaptureDenied {
                        reason: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        self.generation += 1;
        self.watch_primary(&handle);
        self.handle = Some(handle.clone());

        info!(
            capture = handle.id(),
            generation = self.generation,
            tracks = handle.tracks().len(),
            "Screen capture started"
        );
        publish(
            &self.events,
            ShareEvent::CaptureStarted {
                track_ids: handle.track_ids(),
            },
        );

        fanout.start_capture(handle.clone()).await;
        Ok(handle)
    }

    /// Unbind from `fanout`, stop every track and release the source.
    /// Returns `false` if nothing was capturing.
    pub async fn stop(&mut self, fanout: &mut FanoutManager) -> bool {
        let Some(handle) = self.handle.take() else {
            return false;
        };

        fanout.stop_capture().await;
        for track in handle.tracks() {
            track.stop();
        }
        self.source.release(&handle).await;

        info!(capture = handle.id(), "Screen capture stopped");
        publish(&self.events, ShareEvent::CaptureStopped);
        true
    }

    /// The platform ended the primary track (its own "stop sharing" UI).
    /// Runs the same path as an explicit stop.
    pub async fn on_track_ended(&mut self, ended: CaptureEnded, fanout: &mut FanoutManager) -> bool {
        if self.handle.is_none() || ended.generation != self.generation {
            debug!(generation = ended.generation, "Ignoring end of a previous capture");
            return false;
        }
        info!(generation = ended.generation, "Capture ended by platform");
        self.stop(fanout).await
    }

    fn watch_primary(&self, handle: &CaptureHandle) {
        let Some(primary) = handle.primary().cloned() else {
            return;
        };
        let ended_tx = self.ended_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            primary.ended().await;
            let _ = ended_tx.send(CaptureEnded { generation });
        });
    }
}
