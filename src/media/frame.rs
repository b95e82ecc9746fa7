use bytes::Bytes;

/// Block of audio samples (f32, interleaved)
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    /// Raw audio samples (interleaved, nominally in [-1.0, 1.0])
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the producing track started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Silent frame covering `duration_ms`
    pub fn silence(sample_rate: u32, channels: u16, duration_ms: u64, timestamp_ms: u64) -> Self {
        let frames = (sample_rate as u64 * duration_ms / 1000) as usize;
        Self {
            samples: vec![0.0; frames * channels as usize],
            sample_rate,
            channels,
            timestamp_ms,
        }
    }

    /// Duration covered by this frame in milliseconds
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as u64 / self.channels as u64;
        frames * 1000 / self.sample_rate as u64
    }
}

/// A single captured video frame
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Pixel data (RGBA)
    pub data: Bytes,
    /// Timestamp in milliseconds since the producing track started
    pub timestamp_ms: u64,
}
