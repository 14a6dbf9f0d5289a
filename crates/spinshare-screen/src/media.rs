//! Media track handles and the inbound stream accumulator.
//!
//! A [`MediaTrack`] is a cheap handle: clones refer to the same underlying
//! track and share its ended flag, so every sender-side session mirrors the
//! capture's tracks rather than copying them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Track identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Local tracks
// ---------------------------------------------------------------------------

/// Handle to a locally captured track.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: TrackId,
    kind: TrackKind,
    ended: CancellationToken,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
            ended: CancellationToken::new(),
        }
    }

    pub fn video(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Video)
    }

    pub fn audio(id: impl Into<String>) -> Self {
        Self::new(id, TrackKind::Audio)
    }

    pub fn id(&self) -> &TrackId {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// End the track. Returns `false` if it had already ended.
    pub fn stop(&self) -> bool {
        if self.ended.is_cancelled() {
            return false;
        }
        self.ended.cancel();
        true
    }

    pub fn is_ended(&self) -> bool {
        self.ended.is_cancelled()
    }

    /// Resolves once the track ends, whoever ended it.
    pub async fn ended(&self) {
        self.ended.cancelled().await;
    }
}

/// The local capture: one screen track and optionally audio.
#[derive(Debug)]
pub struct CaptureHandle {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl CaptureHandle {
    pub fn new(id: impl Into<String>, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    /// The track whose end means the user stopped sharing: the first video
    /// track, or the first track of any kind.
    pub fn primary(&self) -> Option<&MediaTrack> {
        self.tracks
            .iter()
            .find(|t| t.kind() == TrackKind::Video)
            .or_else(|| self.tracks.first())
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|t| t.id().clone()).collect()
    }
}

// ---------------------------------------------------------------------------
// Inbound stream
// ---------------------------------------------------------------------------

/// A track surfaced by the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTrack {
    pub id: TrackId,
    pub kind: TrackKind,
}

impl RemoteTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self {
            id: TrackId::new(id),
            kind,
        }
    }
}

/// Accumulated inbound media: one stable stream id and the tracks that have
/// arrived for it so far, in arrival order, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundStream {
    id: String,
    tracks: Vec<RemoteTrack>,
}

impl InboundStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[RemoteTrack] {
        &self.tracks
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn contains(&self, id: &TrackId) -> bool {
        self.tracks.iter().any(|t| &t.id == id)
    }

    /// Merge a track in. Returns `false` if it was already present.
    pub fn add_track(&mut self, track: RemoteTrack) -> bool {
        if self.contains(&track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn video(&self) -> Option<&RemoteTrack> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }
}
