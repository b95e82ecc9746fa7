// Signal mixer for combining every captured source into one stream
//
// Audio: each source's audio channels feed a shared summing node. Frames are
// buffered per input and summed sample-wise (no averaging, no clipping; the
// encoder clips). The node's output channel always exists, and carries
// silence when no input has audio or once every input has ended.
//
// Video: channels are carried through untouched and concatenated in source
// order. No compositing happens here.

use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::AcquisitionError;
use crate::media::{AudioFrame, AudioTrack, MediaSource, MixedStream, TrackControl, VideoTrack};

/// ID of the synthesized audio channel
pub const MIXED_AUDIO_TRACK_ID: &str = "mixed-audio";

/// Configuration for the signal mixer
#[derive(Debug, Clone)]
pub struct MixerConfig {
    /// Sample rate of the mixed output
    pub sample_rate: u32,
    /// Number of channels in the mixed output
    pub channels: u16,
    /// Length of generated silence blocks in milliseconds
    pub block_ms: u64,
    /// How many frames one input may run ahead of a silent input before
    /// the node stops waiting and mixes what it has
    pub max_lag_frames: usize,
    /// Capacity of the output channel
    pub output_capacity: usize,
}

impl Default for MixerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            block_ms: 20,
            max_lag_frames: 10,
            output_capacity: 100,
        }
    }
}

/// Builds the mixed stream for a session
pub struct SignalMixer {
    config: MixerConfig,
}

impl SignalMixer {
    pub fn new(config: MixerConfig) -> Self {
        info!(
            "Signal mixer initialized: {}Hz, {} channels",
            config.sample_rate, config.channels
        );
        Self { config }
    }

    pub fn config(&self) -> &MixerConfig {
        &self.config
    }

    /// Compose `sources` into one mixed stream
    ///
    /// Takes the frame receivers of every channel; the sources keep their
    /// controls so they can still be released. Fails only when the audio graph
    /// cannot run (no async runtime, unusable output format).
    pub fn mix(&self, sources: &mut [MediaSource]) -> Result<MixedStream, AcquisitionError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            AcquisitionError::GraphUnavailable(format!("no async runtime for the audio graph: {}", e))
        })?;

        if self.config.sample_rate == 0 || self.config.channels == 0 {
            return Err(AcquisitionError::GraphUnavailable(format!(
                "unsupported output format: {}Hz, {} channels",
                self.config.sample_rate, self.config.channels
            )));
        }

        let mut inputs = Vec::new();
        for source in sources.iter_mut() {
            let kind = source.kind();
            for track in source.audio_tracks_mut() {
                match track.take_frames() {
                    Some(rx) => {
                        debug!("Connecting {} audio channel {} to mix", kind, track.id());
                        inputs.push(rx);
                    }
                    None => warn!("Audio channel {} already consumed, skipping", track.id()),
                }
            }
        }

        let video = concat_video(sources);

        let (stop_tx, stop_rx) = watch::channel(false);
        let control = Arc::new(GraphControl { stop_tx });
        let (output_tx, output_rx) = mpsc::channel(self.config.output_capacity);

        let input_count = inputs.len();
        let node = SummingNode::new(self.config.clone(), input_count);
        let graph = runtime.spawn(node.run(inputs, output_tx, stop_rx));

        let audio = AudioTrack::new(MIXED_AUDIO_TRACK_ID, control, output_rx);

        info!(
            "Mixed stream ready: {} audio inputs summed, {} video channels",
            input_count,
            video.len()
        );

        Ok(MixedStream::new(audio, video).with_graph(graph))
    }
}

/// Carry every video channel through, in source order
pub fn concat_video(sources: &mut [MediaSource]) -> Vec<VideoTrack> {
    let mut video = Vec::new();
    for source in sources.iter_mut() {
        for track in source.video_tracks_mut() {
            match track.share() {
                Some(shared) => video.push(shared),
                None => warn!("Video channel {} already consumed, skipping", track.id()),
            }
        }
    }
    video
}

/// Sum frames sample-wise
///
/// Output length is the longest input; shorter inputs contribute zero past
/// their end. The earliest timestamp wins.
pub fn sum_frames(frames: &[AudioFrame], sample_rate: u32, channels: u16) -> AudioFrame {
    let timestamp_ms = frames.iter().map(|f| f.timestamp_ms).min().unwrap_or(0);
    let max_len = frames.iter().map(|f| f.samples.len()).max().unwrap_or(0);

    let mut samples = vec![0.0f32; max_len];
    for frame in frames {
        for (out, sample) in samples.iter_mut().zip(&frame.samples) {
            *out += *sample;
        }
    }

    AudioFrame {
        samples,
        sample_rate,
        channels,
        timestamp_ms,
    }
}

/// Control of the synthesized audio channel; stopping it tears down the graph
struct GraphControl {
    stop_tx: watch::Sender<bool>,
}

impl TrackControl for GraphControl {
    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    fn is_live(&self) -> bool {
        !*self.stop_tx.borrow()
    }
}

type InputEvent = (usize, Option<AudioFrame>);

/// Yields `(index, Some(frame))` per frame, then `(index, None)` once closed
fn input_stream(index: usize, rx: mpsc::Receiver<AudioFrame>) -> BoxStream<'static, InputEvent> {
    stream::unfold(Some(rx), move |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(frame) => Some(((index, Some(frame)), Some(rx))),
            None => Some(((index, None), None)),
        }
    })
    .boxed()
}

/// Shared summing node of the audio graph
struct SummingNode {
    config: MixerConfig,
    buffers: Vec<VecDeque<AudioFrame>>,
    open: Vec<bool>,
    /// End of the last emitted block, where generated silence continues
    next_timestamp_ms: u64,
}

impl SummingNode {
    fn new(config: MixerConfig, inputs: usize) -> Self {
        Self {
            config,
            buffers: (0..inputs).map(|_| VecDeque::new()).collect(),
            open: vec![true; inputs],
            next_timestamp_ms: 0,
        }
    }

    async fn run(
        mut self,
        inputs: Vec<mpsc::Receiver<AudioFrame>>,
        output: mpsc::Sender<AudioFrame>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        if inputs.is_empty() {
            info!("No audio inputs, mixed channel carries silence");
            self.run_silence(output, stop_rx).await;
            return;
        }

        let mut merged = stream::select_all(
            inputs
                .into_iter()
                .enumerate()
                .map(|(index, rx)| input_stream(index, rx)),
        );

        loop {
            tokio::select! {
                _ = stop_rx.changed() => {
                    debug!("Audio graph stopped");
                    return;
                }
                event = merged.next() => match event {
                    Some((index, Some(frame))) => self.buffer_frame(index, frame),
                    Some((index, None)) => {
                        debug!("Audio input {} ended", index);
                        self.open[index] = false;
                    }
                    None => break,
                },
            }

            if !self.emit_ready(&output).await {
                debug!("Mixed audio consumer gone, stopping graph");
                return;
            }
        }

        // Every input ended; flush what is still buffered
        if !self.emit_ready(&output).await {
            return;
        }

        info!("All audio inputs ended, mixed channel continues with silence");
        self.run_silence(output, stop_rx).await;
    }

    /// Send every block that is ready; false once the consumer is gone
    async fn emit_ready(&mut self, output: &mpsc::Sender<AudioFrame>) -> bool {
        while let Some(mixed) = self.mix_next_block() {
            let end_ms = mixed.timestamp_ms + mixed.duration_ms();
            if output.send(mixed).await.is_err() {
                return false;
            }
            self.next_timestamp_ms = self.next_timestamp_ms.max(end_ms);
        }
        true
    }

    /// Emit silent blocks so the mixed channel carries a signal without live inputs
    async fn run_silence(&self, output: mpsc::Sender<AudioFrame>, mut stop_rx: watch::Receiver<bool>) {
        let block_ms = self.config.block_ms.max(1);
        let mut ticker = tokio::time::interval(Duration::from_millis(block_ms));
        let mut timestamp_ms = self.next_timestamp_ms;

        loop {
            tokio::select! {
                _ = stop_rx.changed() => return,
                _ = ticker.tick() => {
                    let frame = AudioFrame::silence(
                        self.config.sample_rate,
                        self.config.channels,
                        block_ms,
                        timestamp_ms,
                    );
                    if output.send(frame).await.is_err() {
                        return;
                    }
                    timestamp_ms += block_ms;
                }
            }
        }
    }

    fn buffer_frame(&mut self, index: usize, frame: AudioFrame) {
        if frame.sample_rate != self.config.sample_rate {
            warn!(
                "Input {} sample rate mismatch: expected {}, got {}. Dropping frame.",
                index, self.config.sample_rate, frame.sample_rate
            );
            return;
        }

        if frame.channels != self.config.channels {
            warn!(
                "Input {} channel count mismatch: expected {}, got {}. Dropping frame.",
                index, self.config.channels, frame.channels
            );
            return;
        }

        self.buffers[index].push_back(frame);
    }

    /// Mix one block once every open input has a frame, or an input runs too far ahead
    fn mix_next_block(&mut self) -> Option<AudioFrame> {
        if self.buffers.iter().all(|b| b.is_empty()) {
            return None;
        }

        let waiting = self
            .buffers
            .iter()
            .zip(&self.open)
            .any(|(buffer, open)| *open && buffer.is_empty());
        let lagging = self
            .buffers
            .iter()
            .any(|b| b.len() > self.config.max_lag_frames);

        if waiting && !lagging {
            return None;
        }

        let frames: Vec<AudioFrame> = self
            .buffers
            .iter_mut()
            .filter_map(|b| b.pop_front())
            .collect();

        Some(sum_frames(&frames, self.config.sample_rate, self.config.channels))
    }
}
