//! Capture device and render sink boundaries
//!
//! The raw capture API and the rendering layer live outside this crate.
//! [`CaptureDevice`] stands for the capture API (`acquire` a stream, stop it
//! again with `release`) and [`RenderSink`] for a video element the
//! rendering layer paints.
//!
//! ```text
//! ┌────────────────┐ acquire  ┌────────────────┐ render(muted)    ┌───────────┐
//! │ CaptureDevice  │─────────▶│  MediaSession  │─────────────────▶│ self sink │
//! └────────────────┘ release  │                │ render(unmuted)  ├───────────┤
//!                             │                │─────────────────▶│remote sink│
//!                             └────────────────┘                  └───────────┘
//! ```

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::CaptureResult;

/// What to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self { audio: true, video: true }
    }
}

impl MediaConstraints {
    pub fn audio_only() -> Self {
        Self { audio: true, video: false }
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

/// Kind of a track inside a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A live audio/video stream, playable into a [`RenderSink`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    pub id: StreamId,
    /// Human readable origin, e.g. the device name
    pub label: String,
    pub tracks: Vec<TrackKind>,
}

impl MediaStream {
    pub fn new(label: impl Into<String>, constraints: MediaConstraints) -> Self {
        let mut tracks = Vec::with_capacity(2);
        if constraints.audio {
            tracks.push(TrackKind::Audio);
        }
        if constraints.video {
            tracks.push(TrackKind::Video);
        }
        Self {
            id: StreamId::new(),
            label: label.into(),
            tracks,
        }
    }

    pub fn has_video(&self) -> bool {
        self.tracks.contains(&TrackKind::Video)
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.contains(&TrackKind::Audio)
    }
}

/// The external capture API
#[async_trait]
pub trait CaptureDevice: Send + Sync + fmt::Debug {
    /// Acquire a local stream matching `constraints`
    async fn acquire(&self, constraints: MediaConstraints) -> CaptureResult<MediaStream>;

    /// Stop every track of a stream previously returned by `acquire`
    fn release(&self, stream: &MediaStream);
}

/// How a stream should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    pub muted: bool,
    pub full_size: bool,
}

impl RenderOptions {
    /// Self-preview: muted so the user does not hear themselves
    pub const PREVIEW: RenderOptions = RenderOptions { muted: true, full_size: false };
    /// Remote party: audible and full size
    pub const REMOTE: RenderOptions = RenderOptions { muted: false, full_size: true };
}

/// A render target owned by the rendering layer
pub trait RenderSink: Send + Sync + fmt::Debug {
    /// Start playing `stream`, replacing whatever was attached
    fn render(&self, stream: &MediaStream, options: RenderOptions);

    /// Stop playing; must be safe to call when nothing is attached
    fn detach(&self);
}

/// The self-preview and remote sinks handed to a media session
#[derive(Debug, Clone)]
pub struct MediaSinks {
    pub local: Arc<dyn RenderSink>,
    pub remote: Arc<dyn RenderSink>,
}

impl MediaSinks {
    pub fn new(local: Arc<dyn RenderSink>, remote: Arc<dyn RenderSink>) -> Self {
        Self { local, remote }
    }
}
