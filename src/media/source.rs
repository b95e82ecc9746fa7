use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use super::frame::{AudioFrame, VideoFrame};

/// What kind of device produced a media source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Audio-only microphone capture
    Microphone,
    /// Screen/window capture, optionally carrying the surface's own audio
    DisplayCapture,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Microphone => write!(f, "microphone"),
            SourceKind::DisplayCapture => write!(f, "display-capture"),
        }
    }
}

/// Device-side handle for one live channel
///
/// Implemented by the device layer. `stop` releases the underlying capture
/// handle; the session calls it exactly once per channel.
pub trait TrackControl: Send + Sync {
    /// Stop the channel and release its device handle
    fn stop(&self);

    /// Whether the channel is still producing
    fn is_live(&self) -> bool;
}

/// One live channel: a frame receiver plus the control that can stop it
pub struct MediaTrack<F> {
    id: String,
    control: Arc<dyn TrackControl>,
    frames: Option<mpsc::Receiver<F>>,
}

pub type AudioTrack = MediaTrack<AudioFrame>;
pub type VideoTrack = MediaTrack<VideoFrame>;

impl<F> MediaTrack<F> {
    pub fn new(
        id: impl Into<String>,
        control: Arc<dyn TrackControl>,
        frames: mpsc::Receiver<F>,
    ) -> Self {
        Self {
            id: id.into(),
            control,
            frames: Some(frames),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_live(&self) -> bool {
        self.control.is_live()
    }

    pub fn control(&self) -> Arc<dyn TrackControl> {
        Arc::clone(&self.control)
    }

    /// Take the frame receiver; a track's frames can only be consumed once
    pub fn take_frames(&mut self) -> Option<mpsc::Receiver<F>> {
        self.frames.take()
    }

    /// Move the frame receiver into a new track that shares this track's control
    ///
    /// Used to carry a channel into a composite stream while the owning
    /// source keeps the authority to stop it.
    pub fn share(&mut self) -> Option<MediaTrack<F>> {
        let frames = self.frames.take()?;
        Some(MediaTrack {
            id: self.id.clone(),
            control: Arc::clone(&self.control),
            frames: Some(frames),
        })
    }
}

impl<F> fmt::Debug for MediaTrack<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("live", &self.control.is_live())
            .field("frames_attached", &self.frames.is_some())
            .finish()
    }
}

/// A live producer of zero or more audio and video channels
///
/// Released exactly once, either explicitly via [`MediaSource::release`] or
/// when dropped.
pub struct MediaSource {
    kind: SourceKind,
    audio: Vec<AudioTrack>,
    video: Vec<VideoTrack>,
    activity: Option<watch::Receiver<bool>>,
    released: bool,
}

impl MediaSource {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            audio: Vec::new(),
            video: Vec::new(),
            activity: None,
            released: false,
        }
    }

    pub fn with_audio(mut self, track: AudioTrack) -> Self {
        self.audio.push(track);
        self
    }

    pub fn with_video(mut self, track: VideoTrack) -> Self {
        self.video.push(track);
        self
    }

    /// Attach the device's activity signal (`false` once the surface is gone)
    pub fn with_activity(mut self, activity: watch::Receiver<bool>) -> Self {
        self.activity = Some(activity);
        self
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn audio_channel_count(&self) -> usize {
        self.audio.len()
    }

    pub fn has_video(&self) -> bool {
        !self.video.is_empty()
    }

    pub fn video_channel_count(&self) -> usize {
        self.video.len()
    }

    pub fn audio_tracks_mut(&mut self) -> &mut [AudioTrack] {
        &mut self.audio
    }

    pub fn video_tracks_mut(&mut self) -> &mut [VideoTrack] {
        &mut self.video
    }

    pub fn activity(&self) -> Option<watch::Receiver<bool>> {
        self.activity.clone()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Stop every channel of this source
    ///
    /// Returns the number of channels stopped; 0 if already released.
    pub fn release(&mut self) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;

        for track in &self.audio {
            track.control.stop();
        }
        for track in &self.video {
            track.control.stop();
        }

        let stopped = self.audio.len() + self.video.len();
        debug!("Released {} source: {} channels stopped", self.kind, stopped);
        stopped
    }
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaSource")
            .field("kind", &self.kind)
            .field("audio", &self.audio)
            .field("video", &self.video)
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for MediaSource {
    fn drop(&mut self) {
        if !self.released {
            warn!("{} source dropped while held open, releasing", self.kind);
            self.release();
        }
    }
}
