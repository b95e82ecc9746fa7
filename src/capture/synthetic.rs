// Synthetic device layer
//
// Generates a sine tone (or plays a WAV file) as the microphone and a
// color-cycling RGBA surface as the display capture. Used by the binary when
// no platform capture is wired in, and for batch runs. Generators drop frames
// instead of blocking when their consumer falls behind, like a live device.

use async_trait::async_trait;
use bytes::Bytes;
use std::f32::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::acquirer::CaptureDevices;
use crate::audio::AudioFile;
use crate::error::AcquisitionError;
use crate::media::{
    AudioFrame, AudioTrack, MediaSource, SourceKind, TrackControl, VideoFrame, VideoTrack,
};

/// Configuration for generated devices
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    pub sample_rate: u32,
    pub channels: u16,
    /// Audio block length in milliseconds
    pub block_ms: u64,
    /// Microphone tone frequency in Hz
    pub tone_hz: f32,
    /// Whether the display surface carries its own audio
    pub display_audio: bool,
    pub display_width: u32,
    pub display_height: u32,
    pub frame_rate: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            block_ms: 20,
            tone_hz: 440.0,
            display_audio: true,
            display_width: 320,
            display_height: 180,
            frame_rate: 10,
        }
    }
}

/// Generator-backed capture devices
pub struct SyntheticDevices {
    config: SyntheticConfig,
    microphone_file: Option<Arc<AudioFile>>,
    microphone_error: Option<AcquisitionError>,
    display_error: Option<AcquisitionError>,
    surface: Mutex<Option<watch::Sender<bool>>>,
}

impl SyntheticDevices {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            microphone_file: None,
            microphone_error: None,
            display_error: None,
            surface: Mutex::new(None),
        }
    }

    /// Play `file` as the microphone instead of the tone
    pub fn with_microphone_file(mut self, file: AudioFile) -> Self {
        if file.sample_rate != self.config.sample_rate || file.channels != self.config.channels {
            warn!(
                "Microphone file {} is {}Hz/{}ch but the mix runs at {}Hz/{}ch; its frames will be dropped",
                file.path, file.sample_rate, file.channels, self.config.sample_rate, self.config.channels
            );
        }
        self.microphone_file = Some(Arc::new(file));
        self
    }

    /// Make every microphone request fail with `error`
    pub fn deny_microphone(mut self, error: AcquisitionError) -> Self {
        self.microphone_error = Some(error);
        self
    }

    /// Make every display request fail with `error`
    pub fn deny_display(mut self, error: AcquisitionError) -> Self {
        self.display_error = Some(error);
        self
    }

    /// End the current display share, as if the user stopped it out-of-band
    ///
    /// Returns false when no display surface is open.
    pub fn revoke_display(&self) -> bool {
        let surface = match self.surface.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match surface.as_ref() {
            Some(tx) => {
                info!("Display surface revoked");
                tx.send_replace(false);
                true
            }
            None => false,
        }
    }

    fn tone_track(&self, id: &str, tone_hz: f32) -> AudioTrack {
        let (control, stop_rx) = GeneratorControl::new();
        let (tx, rx) = mpsc::channel(64);
        let config = self.config.clone();

        tokio::spawn(generate_tone(config, tone_hz, tx, stop_rx));

        AudioTrack::new(id, control, rx)
    }

    fn file_track(&self, id: &str, file: Arc<AudioFile>) -> AudioTrack {
        let (control, stop_rx) = GeneratorControl::new();
        let (tx, rx) = mpsc::channel(64);
        let block_ms = self.config.block_ms;

        tokio::spawn(play_file(file, block_ms, tx, stop_rx));

        AudioTrack::new(id, control, rx)
    }

    fn surface_track(&self, id: &str) -> VideoTrack {
        let (control, stop_rx) = GeneratorControl::new();
        let (tx, rx) = mpsc::channel(16);
        let config = self.config.clone();

        tokio::spawn(generate_frames(config, tx, stop_rx));

        VideoTrack::new(id, control, rx)
    }
}

#[async_trait]
impl CaptureDevices for SyntheticDevices {
    async fn open_microphone(&self) -> Result<MediaSource, AcquisitionError> {
        if let Some(error) = &self.microphone_error {
            return Err(error.clone());
        }

        let track = match &self.microphone_file {
            Some(file) => self.file_track("microphone-file", Arc::clone(file)),
            None => self.tone_track("microphone-tone", self.config.tone_hz),
        };

        Ok(MediaSource::new(SourceKind::Microphone).with_audio(track))
    }

    async fn open_display(&self) -> Result<MediaSource, AcquisitionError> {
        if let Some(error) = &self.display_error {
            return Err(error.clone());
        }

        let (surface_tx, surface_rx) = watch::channel(true);
        {
            let mut surface = match self.surface.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *surface = Some(surface_tx);
        }

        let mut source = MediaSource::new(SourceKind::DisplayCapture)
            .with_video(self.surface_track("display-surface"))
            .with_activity(surface_rx);

        if self.config.display_audio {
            // A fifth above the microphone tone so the mix is audible as two sources
            source = source.with_audio(self.tone_track("display-audio", self.config.tone_hz * 1.5));
        }

        Ok(source)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct GeneratorControl {
    stop_tx: watch::Sender<bool>,
}

impl GeneratorControl {
    fn new() -> (Arc<dyn TrackControl>, watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        (Arc::new(Self { stop_tx }), stop_rx)
    }
}

impl TrackControl for GeneratorControl {
    fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    fn is_live(&self) -> bool {
        !*self.stop_tx.borrow()
    }
}

/// Returns false once the consumer is gone
fn deliver<F>(tx: &mpsc::Sender<F>, frame: F) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            debug!("Consumer behind, dropping generated frame");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

async fn generate_tone(
    config: SyntheticConfig,
    tone_hz: f32,
    tx: mpsc::Sender<AudioFrame>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let block_ms = config.block_ms.max(1);
    let per_block = (config.sample_rate as u64 * block_ms / 1000) as usize;
    let mut ticker = tokio::time::interval(Duration::from_millis(block_ms));
    let mut position: u64 = 0;
    let mut timestamp_ms = 0;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let mut samples = Vec::with_capacity(per_block * config.channels as usize);
                for i in 0..per_block as u64 {
                    let t = (position + i) as f32 / config.sample_rate as f32;
                    let value = (2.0 * PI * tone_hz * t).sin() * 0.25;
                    for _ in 0..config.channels {
                        samples.push(value);
                    }
                }
                position += per_block as u64;

                let frame = AudioFrame {
                    samples,
                    sample_rate: config.sample_rate,
                    channels: config.channels,
                    timestamp_ms,
                };
                if !deliver(&tx, frame) {
                    break;
                }
                timestamp_ms += block_ms;
            }
        }
    }

    debug!("Tone generator at {}Hz stopped", tone_hz);
}

async fn play_file(
    file: Arc<AudioFile>,
    block_ms: u64,
    tx: mpsc::Sender<AudioFrame>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(block_ms.max(1)));
    let mut frames = file.frames(block_ms).into_iter();

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => match frames.next() {
                Some(frame) => {
                    if !deliver(&tx, frame) {
                        break;
                    }
                }
                None => {
                    info!("Microphone file {} finished", file.path);
                    break;
                }
            }
        }
    }
}

async fn generate_frames(
    config: SyntheticConfig,
    tx: mpsc::Sender<VideoFrame>,
    mut stop_rx: watch::Receiver<bool>,
) {
    const COLORS: [[u8; 4]; 4] = [
        [0x20, 0x60, 0xc0, 0xff],
        [0x20, 0xa0, 0x60, 0xff],
        [0xc0, 0x80, 0x20, 0xff],
        [0x80, 0x30, 0xa0, 0xff],
    ];

    let pixels = (config.display_width * config.display_height) as usize;
    let palette: Vec<Bytes> = COLORS
        .iter()
        .map(|rgba| Bytes::from(rgba.repeat(pixels)))
        .collect();

    let interval_ms = 1000 / config.frame_rate.max(1) as u64;
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    let mut index: u64 = 0;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {
                let frame = VideoFrame {
                    width: config.display_width,
                    height: config.display_height,
                    data: palette[(index as usize / config.frame_rate.max(1) as usize) % palette.len()].clone(),
                    timestamp_ms: index * interval_ms,
                };
                if !deliver(&tx, frame) {
                    break;
                }
                index += 1;
            }
        }
    }

    debug!("Display frame generator stopped after {} frames", index);
}
