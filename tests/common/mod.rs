// Shared fakes for integration tests
//
// Devices hand out channels whose controls count how often they were stopped;
// the encoder emits whatever the test scripts through its handle.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use meeting_recorder::{
    AcquisitionError, AudioFrame, CaptureDevices, Encoder, EncoderEvent, EncoderFactory,
    MediaSource, MixedStream, SourceKind, TrackControl, VideoFrame,
};
use meeting_recorder::media::{AudioTrack, VideoTrack};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Notify};

pub const SAMPLE_RATE: u32 = 48000;

/// Track control that records every stop
#[derive(Default)]
pub struct CountingControl {
    stops: AtomicUsize,
}

impl CountingControl {
    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

impl TrackControl for CountingControl {
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.stops() == 0
    }
}

/// Poll `condition` until it holds, for up to two seconds
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

pub fn audio_frame(samples: Vec<f32>, timestamp_ms: u64) -> AudioFrame {
    AudioFrame {
        samples,
        sample_rate: SAMPLE_RATE,
        channels: 1,
        timestamp_ms,
    }
}

/// Audio track plus the sender feeding it
pub fn audio_track(id: &str) -> (AudioTrack, mpsc::Sender<AudioFrame>, Arc<CountingControl>) {
    let control = Arc::new(CountingControl::default());
    let (tx, rx) = mpsc::channel(16);
    let track = AudioTrack::new(id, control.clone() as Arc<dyn TrackControl>, rx);
    (track, tx, control)
}

/// Video track plus the sender feeding it
pub fn video_track(id: &str) -> (VideoTrack, mpsc::Sender<VideoFrame>, Arc<CountingControl>) {
    let control = Arc::new(CountingControl::default());
    let (tx, rx) = mpsc::channel(16);
    let track = VideoTrack::new(id, control.clone() as Arc<dyn TrackControl>, rx);
    (track, tx, control)
}

/// Scripted device layer
pub struct FakeDevices {
    microphone_error: Option<AcquisitionError>,
    display_error: Option<AcquisitionError>,
    display_has_audio: bool,
    microphone_gate: Option<Arc<Notify>>,
    controls: Mutex<Vec<(String, Arc<CountingControl>)>>,
    audio_senders: Mutex<Vec<mpsc::Sender<AudioFrame>>>,
    video_senders: Mutex<Vec<mpsc::Sender<VideoFrame>>>,
    surface: watch::Sender<bool>,
}

impl FakeDevices {
    pub fn new() -> Self {
        let (surface, _) = watch::channel(true);
        Self {
            microphone_error: None,
            display_error: None,
            display_has_audio: true,
            microphone_gate: None,
            controls: Mutex::new(Vec::new()),
            audio_senders: Mutex::new(Vec::new()),
            video_senders: Mutex::new(Vec::new()),
            surface,
        }
    }

    pub fn deny_microphone(mut self, error: AcquisitionError) -> Self {
        self.microphone_error = Some(error);
        self
    }

    pub fn deny_display(mut self, error: AcquisitionError) -> Self {
        self.display_error = Some(error);
        self
    }

    pub fn without_display_audio(mut self) -> Self {
        self.display_has_audio = false;
        self
    }

    /// Hold every microphone request until `gate` is notified
    pub fn gate_microphone(mut self, gate: Arc<Notify>) -> Self {
        self.microphone_gate = Some(gate);
        self
    }

    /// Close every audio input handed out so far, as a disconnected device would
    pub fn end_audio(&self) {
        self.audio_senders.lock().unwrap().clear();
    }

    /// Simulate the user ending the share out-of-band
    pub fn revoke_surface(&self) {
        self.surface.send_replace(false);
    }

    /// Every channel handed out so far
    pub fn controls(&self) -> Vec<(String, Arc<CountingControl>)> {
        self.controls.lock().unwrap().clone()
    }

    pub fn opened_channels(&self) -> usize {
        self.controls.lock().unwrap().len()
    }

    /// Whether every channel handed out was stopped exactly once
    pub fn all_stopped_once(&self) -> bool {
        self.controls().iter().all(|(_, c)| c.stops() == 1)
    }

    pub fn total_stops(&self) -> usize {
        self.controls().iter().map(|(_, c)| c.stops()).sum()
    }

    fn audio(&self, id: &str) -> AudioTrack {
        let (track, tx, control) = audio_track(id);
        self.controls.lock().unwrap().push((id.to_string(), control));
        self.audio_senders.lock().unwrap().push(tx);
        track
    }

    fn video(&self, id: &str) -> VideoTrack {
        let (track, tx, control) = video_track(id);
        self.controls.lock().unwrap().push((id.to_string(), control));
        self.video_senders.lock().unwrap().push(tx);
        track
    }
}

#[async_trait]
impl CaptureDevices for FakeDevices {
    async fn open_microphone(&self) -> Result<MediaSource, AcquisitionError> {
        if let Some(gate) = &self.microphone_gate {
            gate.notified().await;
        }
        tokio::task::yield_now().await;
        if let Some(e) = &self.microphone_error {
            return Err(e.clone());
        }
        Ok(MediaSource::new(SourceKind::Microphone).with_audio(self.audio("microphone")))
    }

    async fn open_display(&self) -> Result<MediaSource, AcquisitionError> {
        tokio::task::yield_now().await;
        if let Some(e) = &self.display_error {
            return Err(e.clone());
        }
        let mut source = MediaSource::new(SourceKind::DisplayCapture)
            .with_video(self.video("display-video"))
            .with_activity(self.surface.subscribe());
        if self.display_has_audio {
            source = source.with_audio(self.audio("display-audio"));
        }
        Ok(source)
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Test-side handle to a [`FakeEncoder`]
#[derive(Clone, Default)]
pub struct FakeEncoderHandle {
    tx: Arc<Mutex<Option<mpsc::Sender<EncoderEvent>>>>,
    started: Arc<AtomicBool>,
    stops: Arc<AtomicUsize>,
    video_tracks: Arc<AtomicUsize>,
}

impl FakeEncoderHandle {
    fn sender(&self) -> Option<mpsc::Sender<EncoderEvent>> {
        self.tx.lock().unwrap().clone()
    }

    /// Emit one encoded chunk; false once the encoder has stopped
    pub async fn emit(&self, data: &[u8]) -> bool {
        match self.sender() {
            Some(tx) => tx
                .send(EncoderEvent::Data(bytes::Bytes::copy_from_slice(data)))
                .await
                .is_ok(),
            None => false,
        }
    }

    pub async fn fault(&self, message: &str) -> bool {
        match self.sender() {
            Some(tx) => tx.send(EncoderEvent::Error(message.to_string())).await.is_ok(),
            None => false,
        }
    }

    /// Close the output as if the encoder ended on its own
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn video_tracks(&self) -> usize {
        self.video_tracks.load(Ordering::SeqCst)
    }
}

pub struct FakeEncoder {
    handle: FakeEncoderHandle,
    fail_start: bool,
    stream: Mutex<Option<MixedStream>>,
}

impl FakeEncoder {
    pub fn new(handle: FakeEncoderHandle) -> Self {
        Self {
            handle,
            fail_start: false,
            stream: Mutex::new(None),
        }
    }

    pub fn failing(handle: FakeEncoderHandle) -> Self {
        Self {
            fail_start: true,
            ..Self::new(handle)
        }
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn start(&mut self, stream: MixedStream) -> Result<mpsc::Receiver<EncoderEvent>> {
        if self.fail_start {
            bail!("codec unavailable");
        }
        let (tx, rx) = mpsc::channel(64);
        self.handle
            .video_tracks
            .store(stream.video_track_count(), Ordering::SeqCst);
        *self.handle.tx.lock().unwrap() = Some(tx);
        *self.stream.lock().unwrap() = Some(stream);
        self.handle.started.store(true, Ordering::SeqCst);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.handle.stops.fetch_add(1, Ordering::SeqCst);
        self.handle.tx.lock().unwrap().take();
        self.stream.lock().unwrap().take();
        Ok(())
    }

    fn mime_type(&self) -> &str {
        "video/x-fake"
    }

    fn file_extension(&self) -> &str {
        "fake"
    }
}

/// Hands out a new [`FakeEncoder`] per session and keeps their handles
#[derive(Default)]
pub struct FakeEncoderFactory {
    handles: Mutex<Vec<FakeEncoderHandle>>,
}

impl FakeEncoderFactory {
    pub fn latest(&self) -> Option<FakeEncoderHandle> {
        self.handles.lock().unwrap().last().cloned()
    }

    pub fn created(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}

impl EncoderFactory for FakeEncoderFactory {
    fn create(&self) -> Box<dyn Encoder> {
        let handle = FakeEncoderHandle::default();
        self.handles.lock().unwrap().push(handle.clone());
        Box::new(FakeEncoder::new(handle))
    }
}
