use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::MixerConfig;
use crate::capture::SyntheticConfig;
use crate::encoder::WebmSettings;
use crate::session::SessionConfig;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub devices: DevicesConfig,
    #[serde(default)]
    pub room: RoomConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub recordings_path: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Mixer block length in milliseconds
    pub block_ms: u64,
    /// Encoder chunk cadence in milliseconds
    pub timeslice_ms: u64,
    pub flush_timeout_ms: u64,
    pub encoder: EncoderKind,
    /// ffmpeg executable for the WebM encoder
    pub ffmpeg_path: String,
    pub video_bitrate_kbps: u32,
}

/// Container the session is encoded into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Screen video plus mixed audio, through ffmpeg
    Webm,
    /// Mixed audio only, no external tools
    Wav,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            recordings_path: "recordings".to_string(),
            sample_rate: 48000,
            channels: 1,
            block_ms: 20,
            timeslice_ms: 1000,
            flush_timeout_ms: 5000,
            encoder: EncoderKind::Webm,
            ffmpeg_path: "ffmpeg".to_string(),
            video_bitrate_kbps: 1000,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DevicesConfig {
    pub tone_hz: f32,
    pub display_width: u32,
    pub display_height: u32,
    pub frame_rate: u32,
    /// Whether the captured surface carries its own audio track
    pub display_audio: bool,
    /// Play this WAV file as the microphone instead of a tone
    pub microphone_wav: Option<PathBuf>,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        let synthetic = SyntheticConfig::default();
        Self {
            tone_hz: synthetic.tone_hz,
            display_width: synthetic.display_width,
            display_height: synthetic.display_height,
            frame_rate: synthetic.frame_rate,
            display_audio: synthetic.display_audio,
            microphone_wav: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    pub identifier: Option<String>,
    /// Window title of the form "<room> | <app>"
    pub title: Option<String>,
}

impl Config {
    /// Load from `path` (extension optional), overridden by `RECORDER__*`
    /// environment variables, e.g. `RECORDER__RECORDER__SAMPLE_RATE=16000`
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("RECORDER").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        Ok(settings.try_deserialize()?)
    }

    pub fn mixer(&self) -> MixerConfig {
        MixerConfig {
            sample_rate: self.recorder.sample_rate,
            channels: self.recorder.channels,
            block_ms: self.recorder.block_ms,
            ..MixerConfig::default()
        }
    }

    pub fn synthetic_devices(&self) -> SyntheticConfig {
        SyntheticConfig {
            sample_rate: self.recorder.sample_rate,
            channels: self.recorder.channels,
            block_ms: self.recorder.block_ms,
            tone_hz: self.devices.tone_hz,
            display_audio: self.devices.display_audio,
            display_width: self.devices.display_width,
            display_height: self.devices.display_height,
            frame_rate: self.devices.frame_rate,
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            flush_timeout: Duration::from_millis(self.recorder.flush_timeout_ms),
            ..SessionConfig::default()
        }
    }

    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.recorder.timeslice_ms)
    }

    pub fn webm(&self) -> WebmSettings {
        WebmSettings {
            program: self.recorder.ffmpeg_path.clone(),
            sample_rate: self.recorder.sample_rate,
            channels: self.recorder.channels,
            frame_rate: self.devices.frame_rate,
            timeslice: self.timeslice(),
            video_bitrate_kbps: self.recorder.video_bitrate_kbps,
        }
    }
}
