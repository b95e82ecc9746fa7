use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::frame::{AudioFrame, VideoFrame};
use super::source::{AudioTrack, TrackControl, VideoTrack};

/// Composite output of the signal mixer
///
/// Exactly one synthesized audio channel plus every video channel of the
/// inputs, in acquisition order.
pub struct MixedStream {
    audio: AudioTrack,
    video: Vec<VideoTrack>,
    graph: Option<JoinHandle<()>>,
}

impl MixedStream {
    pub fn new(audio: AudioTrack, video: Vec<VideoTrack>) -> Self {
        Self {
            audio,
            video,
            graph: None,
        }
    }

    pub(crate) fn with_graph(mut self, graph: JoinHandle<()>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn audio_track_id(&self) -> &str {
        self.audio.id()
    }

    pub fn video_track_ids(&self) -> Vec<&str> {
        self.video.iter().map(|t| t.id()).collect()
    }

    pub fn video_track_count(&self) -> usize {
        self.video.len()
    }

    /// Control of the synthesized audio channel
    pub fn audio_control(&self) -> Arc<dyn TrackControl> {
        self.audio.control()
    }

    pub fn take_audio_frames(&mut self) -> Option<mpsc::Receiver<AudioFrame>> {
        self.audio.take_frames()
    }

    pub fn take_video_frames(&mut self) -> Vec<mpsc::Receiver<VideoFrame>> {
        self.video.iter_mut().filter_map(|t| t.take_frames()).collect()
    }

    /// Detach the task driving the audio graph
    pub(crate) fn take_graph(&mut self) -> Option<JoinHandle<()>> {
        self.graph.take()
    }
}
