// Streaming WAV encoder
//
// Encodes the mixed audio channel as 16-bit PCM. The first chunk is a
// RIFF/WAVE header with unknown (0xFFFFFFFF) sizes, since chunks are immutable
// once emitted and the final length is not known up front; every later chunk
// is raw PCM for one timeslice. Concatenating the chunks yields a playable
// streaming WAV. Video channels are drained but not muxed.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use hound::{SampleFormat, WavSpec};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Encoder, EncoderEvent, EncoderFactory};
use crate::media::{AudioFrame, MixedStream, VideoFrame};

/// Size field value for a WAV of unknown length
const STREAMING_SIZE: u32 = u32::MAX;

/// Length of the streaming WAV header in bytes
pub const WAV_HEADER_LEN: usize = 44;

pub struct WavEncoder {
    spec: WavSpec,
    timeslice: Duration,
    capacity: usize,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    drains: Vec<JoinHandle<()>>,
    video_frames: Arc<AtomicU64>,
}

impl WavEncoder {
    /// Create an encoder emitting one chunk per `timeslice`
    ///
    /// Only 16-bit integer PCM is supported.
    pub fn new(spec: WavSpec, timeslice: Duration) -> Result<Self> {
        if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
            bail!(
                "WAV encoder supports 16-bit integer PCM only, got {:?} {}-bit",
                spec.sample_format,
                spec.bits_per_sample
            );
        }
        if spec.channels == 0 || spec.sample_rate == 0 {
            bail!(
                "Invalid WAV format: {}Hz, {} channels",
                spec.sample_rate,
                spec.channels
            );
        }
        if timeslice.is_zero() {
            bail!("Encoder timeslice must be non-zero");
        }

        Ok(Self {
            spec,
            timeslice,
            capacity: 100,
            stop_tx: None,
            task: None,
            drains: Vec::new(),
            video_frames: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 16-bit PCM spec for the given format
    pub fn pcm16(sample_rate: u32, channels: u16) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    pub fn spec(&self) -> WavSpec {
        self.spec
    }
}

/// Builds a fresh [`WavEncoder`] per session from a format checked once
#[derive(Debug, Clone)]
pub struct WavEncoderFactory {
    spec: WavSpec,
    timeslice: Duration,
}

impl WavEncoderFactory {
    pub fn new(spec: WavSpec, timeslice: Duration) -> Result<Self> {
        WavEncoder::new(spec, timeslice)?;
        Ok(Self { spec, timeslice })
    }
}

impl EncoderFactory for WavEncoderFactory {
    fn create(&self) -> Box<dyn Encoder> {
        Box::new(WavEncoder {
            spec: self.spec,
            timeslice: self.timeslice,
            capacity: 100,
            stop_tx: None,
            task: None,
            drains: Vec::new(),
            video_frames: Arc::new(AtomicU64::new(0)),
        })
    }
}

#[async_trait]
impl Encoder for WavEncoder {
    async fn start(&mut self, mut stream: MixedStream) -> Result<mpsc::Receiver<EncoderEvent>> {
        if self.task.is_some() {
            bail!("Encoder already started");
        }

        let audio = stream
            .take_audio_frames()
            .context("Mixed stream audio channel already consumed")?;

        for (index, rx) in stream.take_video_frames().into_iter().enumerate() {
            let counter = Arc::clone(&self.video_frames);
            self.drains.push(tokio::spawn(drain_video(index, rx, counter)));
        }

        let (tx, rx) = mpsc::channel(self.capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        info!(
            "WAV encoder started: {}Hz, {} channels, {}ms timeslice, {} video channels drained",
            self.spec.sample_rate,
            self.spec.channels,
            self.timeslice.as_millis(),
            self.drains.len()
        );

        self.task = Some(tokio::spawn(encode(
            self.spec,
            self.timeslice,
            audio,
            tx,
            stop_rx,
        )));
        self.stop_tx = Some(stop_tx);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            // The task may already have finished on its own
            let _ = stop_tx.send(());
        }

        if let Some(task) = self.task.take() {
            task.await.context("Encoder task panicked")?;
        }

        for drain in self.drains.drain(..) {
            drain.abort();
        }

        info!(
            "WAV encoder stopped ({} video frames drained)",
            self.video_frames.load(Ordering::SeqCst)
        );

        Ok(())
    }

    fn mime_type(&self) -> &str {
        "audio/wav"
    }

    fn file_extension(&self) -> &str {
        "wav"
    }
}

/// RIFF/WAVE header for a stream of unknown length
pub fn streaming_header(spec: &WavSpec) -> Bytes {
    let bytes_per_sample = (spec.bits_per_sample / 8) as u32;
    let block_align = spec.channels as u32 * bytes_per_sample;

    let mut header = BytesMut::with_capacity(WAV_HEADER_LEN);
    header.put_slice(b"RIFF");
    header.put_u32_le(STREAMING_SIZE);
    header.put_slice(b"WAVE");
    header.put_slice(b"fmt ");
    header.put_u32_le(16);
    header.put_u16_le(1); // PCM
    header.put_u16_le(spec.channels);
    header.put_u32_le(spec.sample_rate);
    header.put_u32_le(spec.sample_rate * block_align);
    header.put_u16_le(block_align as u16);
    header.put_u16_le(spec.bits_per_sample);
    header.put_slice(b"data");
    header.put_u32_le(STREAMING_SIZE);
    header.freeze()
}

/// Append `frame` as 16-bit PCM, clipping to [-1, 1]
fn append_pcm(frame: &AudioFrame, pending: &mut BytesMut) {
    pending.reserve(frame.samples.len() * 2);
    for &sample in &frame.samples {
        let value = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        pending.put_i16_le(value);
    }
}

async fn encode(
    spec: WavSpec,
    timeslice: Duration,
    mut audio: mpsc::Receiver<AudioFrame>,
    tx: mpsc::Sender<EncoderEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    if tx.send(EncoderEvent::Data(streaming_header(&spec))).await.is_err() {
        return;
    }

    let mut pending = BytesMut::new();
    let mut ticker = tokio::time::interval_at(Instant::now() + timeslice, timeslice);
    let mut frames: u64 = 0;
    let mut encoded_ms: u64 = 0;

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            frame = audio.recv() => match frame {
                Some(frame) => {
                    if frame.sample_rate != spec.sample_rate || frame.channels != spec.channels {
                        error!(
                            "Mixed audio format changed to {}Hz/{}ch, expected {}Hz/{}ch",
                            frame.sample_rate, frame.channels, spec.sample_rate, spec.channels
                        );
                        let _ = tx
                            .send(EncoderEvent::Error("mixed audio format changed mid-stream".to_string()))
                            .await;
                        return;
                    }
                    append_pcm(&frame, &mut pending);
                    frames += 1;
                    encoded_ms += frame.duration_ms();
                }
                None => {
                    info!("Mixed audio ended, finishing encode");
                    break;
                }
            },
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    let chunk = pending.split().freeze();
                    debug!("Emitting {} byte chunk", chunk.len());
                    if tx.send(EncoderEvent::Data(chunk)).await.is_err() {
                        warn!("Encoder output closed, abandoning encode");
                        return;
                    }
                }
            }
        }
    }

    // Frames the mixer already delivered still belong to the recording
    while let Ok(frame) = audio.try_recv() {
        if frame.sample_rate == spec.sample_rate && frame.channels == spec.channels {
            append_pcm(&frame, &mut pending);
            frames += 1;
            encoded_ms += frame.duration_ms();
        }
    }

    if !pending.is_empty() {
        let _ = tx.send(EncoderEvent::Data(pending.split().freeze())).await;
    }

    info!("WAV encode finished: {} audio frames ({} ms)", frames, encoded_ms);
}

async fn drain_video(index: usize, mut rx: mpsc::Receiver<VideoFrame>, counter: Arc<AtomicU64>) {
    while rx.recv().await.is_some() {
        counter.fetch_add(1, Ordering::SeqCst);
    }
    debug!("Video channel {} ended", index);
}
