// WebM encoder backed by an ffmpeg child process
//
// The first video channel of the mixed stream is piped to ffmpeg as raw RGBA
// on stdin; the mixed audio is streamed as f32le PCM over a loopback TCP
// connection that ffmpeg opens as its second input. ffmpeg muxes VP8 video
// and Opus audio into a live WebM on stdout, which is read back and emitted
// one chunk per timeslice. Further video channels are drained.
//
// The frame size is taken from the first video frame, so ffmpeg is only
// launched once that frame arrives (or right away when there is no video).

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::{Encoder, EncoderEvent, EncoderFactory};
use crate::media::{AudioFrame, MixedStream, VideoFrame};

/// How long ffmpeg gets to connect to the audio socket
const AUDIO_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `stop()` waits for ffmpeg to finish the file before killing it
const STOP_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CAPACITY: usize = 64 * 1024;

/// ffmpeg invocation settings
#[derive(Debug, Clone)]
pub struct WebmSettings {
    /// ffmpeg executable, looked up on PATH unless absolute
    pub program: String,
    pub sample_rate: u32,
    pub channels: u16,
    /// Nominal capture frame rate of the video input
    pub frame_rate: u32,
    /// Chunk cadence
    pub timeslice: Duration,
    /// Target VP8 bitrate in kbit/s
    pub video_bitrate_kbps: u32,
}

impl Default for WebmSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            sample_rate: 48000,
            channels: 1,
            frame_rate: 10,
            timeslice: Duration::from_secs(1),
            video_bitrate_kbps: 1000,
        }
    }
}

impl WebmSettings {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 || self.channels == 0 {
            bail!(
                "Invalid audio format: {}Hz, {} channels",
                self.sample_rate,
                self.channels
            );
        }
        if self.frame_rate == 0 {
            bail!("Video frame rate must be non-zero");
        }
        if self.timeslice.is_zero() {
            bail!("Encoder timeslice must be non-zero");
        }
        Ok(())
    }

    /// Arguments for one ffmpeg run
    ///
    /// `video` is the raw frame size when a video channel is encoded.
    pub fn ffmpeg_args(&self, video: Option<(u32, u32)>, audio_addr: SocketAddr) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if let Some((width, height)) = video {
            // Frames arrive live and irregularly; stamp them on arrival
            args.extend([
                "-use_wallclock_as_timestamps".to_string(),
                "1".to_string(),
                "-f".to_string(),
                "rawvideo".to_string(),
                "-pix_fmt".to_string(),
                "rgba".to_string(),
                "-s".to_string(),
                format!("{}x{}", width, height),
                "-r".to_string(),
                self.frame_rate.to_string(),
                "-i".to_string(),
                "pipe:0".to_string(),
            ]);
        }

        args.extend([
            "-f".to_string(),
            "f32le".to_string(),
            "-ar".to_string(),
            self.sample_rate.to_string(),
            "-ac".to_string(),
            self.channels.to_string(),
            "-i".to_string(),
            format!("tcp://{}", audio_addr),
        ]);

        if video.is_some() {
            args.extend([
                "-map".to_string(),
                "0:v".to_string(),
                "-map".to_string(),
                "1:a".to_string(),
                "-c:v".to_string(),
                "libvpx".to_string(),
                "-deadline".to_string(),
                "realtime".to_string(),
                "-cpu-used".to_string(),
                "8".to_string(),
                "-b:v".to_string(),
                format!("{}k", self.video_bitrate_kbps),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
            ]);
        } else {
            args.extend(["-map".to_string(), "0:a".to_string()]);
        }

        args.extend([
            "-c:a".to_string(),
            "libopus".to_string(),
            "-f".to_string(),
            "webm".to_string(),
            "pipe:1".to_string(),
        ]);

        args
    }
}

pub struct WebmEncoder {
    settings: WebmSettings,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
    drains: Vec<JoinHandle<()>>,
}

impl WebmEncoder {
    pub fn new(settings: WebmSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            stop_tx: None,
            task: None,
            drains: Vec::new(),
        })
    }

    /// Check that the configured ffmpeg can be launched
    pub async fn probe(program: &str) -> Result<()> {
        let output = Command::new(program)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    anyhow::anyhow!("ffmpeg not found: {}", program)
                } else {
                    anyhow::anyhow!("Failed to run {}: {}", program, e)
                }
            })?;

        if !output.status.success() {
            bail!("{} -version exited with {}", program, output.status);
        }
        Ok(())
    }
}

/// Builds a fresh [`WebmEncoder`] per session from settings checked once
#[derive(Debug, Clone)]
pub struct WebmEncoderFactory {
    settings: WebmSettings,
}

impl WebmEncoderFactory {
    pub fn new(settings: WebmSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }
}

impl EncoderFactory for WebmEncoderFactory {
    fn create(&self) -> Box<dyn Encoder> {
        Box::new(WebmEncoder {
            settings: self.settings.clone(),
            stop_tx: None,
            task: None,
            drains: Vec::new(),
        })
    }
}

#[async_trait]
impl Encoder for WebmEncoder {
    async fn start(&mut self, mut stream: MixedStream) -> Result<mpsc::Receiver<EncoderEvent>> {
        if self.task.is_some() {
            bail!("Encoder already started");
        }

        Self::probe(&self.settings.program).await?;

        let audio = stream
            .take_audio_frames()
            .context("Mixed stream audio channel already consumed")?;

        let mut video = stream.take_video_frames().into_iter();
        let screen = video.next();
        for (index, rx) in video.enumerate() {
            self.drains.push(tokio::spawn(drain_video(index + 1, rx)));
        }

        let (tx, rx) = mpsc::channel(100);
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            "WebM encoder started via {}: {}Hz, {} channels, video={}, {} extra video channels drained",
            self.settings.program,
            self.settings.sample_rate,
            self.settings.channels,
            screen.is_some(),
            self.drains.len()
        );

        self.task = Some(tokio::spawn(encode(
            self.settings.clone(),
            audio,
            screen,
            tx,
            stop_rx,
        )));
        self.stop_tx = Some(stop_tx);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            stop_tx.send_replace(true);
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(STOP_TIMEOUT, &mut task).await {
                Ok(joined) => joined.context("Encoder task panicked")?,
                Err(_) => {
                    // Dropping the task's child handle kills ffmpeg
                    warn!("ffmpeg did not finish within {:?}, killing it", STOP_TIMEOUT);
                    task.abort();
                }
            }
        }

        for drain in self.drains.drain(..) {
            drain.abort();
        }

        info!("WebM encoder stopped");
        Ok(())
    }

    fn mime_type(&self) -> &str {
        "video/webm"
    }

    fn file_extension(&self) -> &str {
        "webm"
    }
}

/// Append `frame` as f32le PCM
pub fn append_f32le(frame: &AudioFrame, pending: &mut BytesMut) {
    pending.reserve(frame.samples.len() * 4);
    for &sample in &frame.samples {
        pending.put_f32_le(sample);
    }
}

async fn encode(
    settings: WebmSettings,
    audio: mpsc::Receiver<AudioFrame>,
    screen: Option<mpsc::Receiver<VideoFrame>>,
    tx: mpsc::Sender<EncoderEvent>,
    stop_rx: watch::Receiver<bool>,
) {
    if let Err(e) = run_ffmpeg(settings, audio, screen, &tx, stop_rx).await {
        error!("WebM encode failed: {:#}", e);
        let _ = tx.send(EncoderEvent::Error(format!("{:#}", e))).await;
    }
}

async fn run_ffmpeg(
    settings: WebmSettings,
    mut audio: mpsc::Receiver<AudioFrame>,
    screen: Option<mpsc::Receiver<VideoFrame>>,
    tx: &mpsc::Sender<EncoderEvent>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut pending_audio = BytesMut::new();

    // Hold audio until the first frame fixes the raw video size
    let mut video = None;
    if let Some(mut rx) = screen {
        loop {
            tokio::select! {
                _ = stopped(&mut stop_rx) => break,
                frame = rx.recv() => {
                    match frame {
                        Some(frame) => video = Some((frame, rx)),
                        None => debug!("Video channel ended before its first frame"),
                    }
                    break;
                }
                frame = audio.recv() => match frame {
                    Some(frame) => append_f32le(&frame, &mut pending_audio),
                    None => break,
                },
            }
        }
    }

    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("Failed to open the audio socket")?;
    let audio_addr = listener.local_addr()?;

    let size = video.as_ref().map(|(frame, _)| (frame.width, frame.height));
    let args = settings.ffmpeg_args(size, audio_addr);
    debug!("Launching {} {:?}", settings.program, args);

    let mut child = Command::new(&settings.program)
        .args(&args)
        .stdin(if size.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start {}", settings.program))?;

    let mut stdout = child.stdout.take().context("Failed to capture ffmpeg stdout")?;
    let mut stderr = child.stderr.take().context("Failed to capture ffmpeg stderr")?;
    let stderr_task = tokio::spawn(async move {
        let mut message = String::new();
        let _ = stderr.read_to_string(&mut message).await;
        message
    });

    let video_task = match (child.stdin.take(), video) {
        (Some(stdin), Some((first, rx))) => {
            Some(tokio::spawn(feed_video(stdin, first, rx, stop_rx.clone())))
        }
        _ => None,
    };
    let audio_task = tokio::spawn(feed_audio(
        listener,
        pending_audio.freeze(),
        audio,
        stop_rx.clone(),
    ));

    let mut pending = BytesMut::with_capacity(READ_CAPACITY);
    let mut ticker = tokio::time::interval_at(Instant::now() + settings.timeslice, settings.timeslice);
    let mut emitted: usize = 0;

    loop {
        pending.reserve(READ_CAPACITY);
        tokio::select! {
            read = stdout.read_buf(&mut pending) => {
                if read.context("Failed to read ffmpeg output")? == 0 {
                    break;
                }
            }
            _ = ticker.tick() => {
                if !pending.is_empty() {
                    let chunk = pending.split().freeze();
                    emitted += chunk.len();
                    debug!("Emitting {} byte chunk", chunk.len());
                    if tx.send(EncoderEvent::Data(chunk)).await.is_err() {
                        warn!("Encoder output closed, abandoning encode");
                        return Ok(());
                    }
                }
            }
        }
    }

    if !pending.is_empty() {
        emitted += pending.len();
        let _ = tx.send(EncoderEvent::Data(pending.split().freeze())).await;
    }

    let status = child.wait().await.context("Failed to wait for ffmpeg")?;
    if !status.success() {
        audio_task.abort();
        if let Some(task) = &video_task {
            task.abort();
        }
        let stderr = stderr_task.await.unwrap_or_default();
        bail!(
            "ffmpeg exited with {}: {}",
            status,
            stderr.lines().last().unwrap_or("unknown error")
        );
    }

    let audio_bytes = match audio_task.await {
        Ok(result) => result?,
        Err(e) => bail!("Audio feeder failed: {}", e),
    };
    let video_frames = match video_task {
        Some(task) => match task.await {
            Ok(result) => result?,
            Err(e) => bail!("Video feeder failed: {}", e),
        },
        None => 0,
    };

    info!(
        "WebM encode finished: {} bytes out, {} video frames, {} audio bytes in",
        emitted, video_frames, audio_bytes
    );
    Ok(())
}

/// Write raw frames of the first frame's size to ffmpeg until stopped
async fn feed_video(
    mut stdin: ChildStdin,
    first: VideoFrame,
    mut rx: mpsc::Receiver<VideoFrame>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<u64> {
    let (width, height) = (first.width, first.height);
    let expected = width as usize * height as usize * 4;
    let mut written = 0u64;

    let accept = |frame: VideoFrame| -> Option<Bytes> {
        if frame.width != width || frame.height != height || frame.data.len() != expected {
            warn!(
                "Dropping {}x{} video frame, encoding {}x{}",
                frame.width, frame.height, width, height
            );
            return None;
        }
        Some(frame.data)
    };

    if let Some(data) = accept(first) {
        stdin.write_all(&data).await.context("Failed to write video frame")?;
        written += 1;
    }

    loop {
        tokio::select! {
            _ = stopped(&mut stop_rx) => break,
            frame = rx.recv() => match frame {
                Some(frame) => {
                    if let Some(data) = accept(frame) {
                        stdin.write_all(&data).await.context("Failed to write video frame")?;
                        written += 1;
                    }
                }
                None => break,
            },
        }
    }

    stdin.shutdown().await.context("Failed to close ffmpeg stdin")?;
    Ok(written)
}

/// Stream mixed audio to ffmpeg until stopped, flushing frames already queued
async fn feed_audio(
    listener: TcpListener,
    pending: Bytes,
    mut audio: mpsc::Receiver<AudioFrame>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<usize> {
    let (mut socket, _) = tokio::time::timeout(AUDIO_CONNECT_TIMEOUT, listener.accept())
        .await
        .context("ffmpeg did not connect to the audio socket")?
        .context("Failed to accept the audio connection")?;

    let mut written = pending.len();
    socket.write_all(&pending).await.context("Failed to write audio")?;

    let mut buffer = BytesMut::new();
    loop {
        tokio::select! {
            _ = stopped(&mut stop_rx) => break,
            frame = audio.recv() => match frame {
                Some(frame) => append_f32le(&frame, &mut buffer),
                None => break,
            },
        }
        if !buffer.is_empty() {
            written += buffer.len();
            socket
                .write_all(&buffer.split())
                .await
                .context("Failed to write audio")?;
        }
    }

    while let Ok(frame) = audio.try_recv() {
        append_f32le(&frame, &mut buffer);
    }
    written += buffer.len();
    socket.write_all(&buffer).await.context("Failed to write audio")?;
    socket.shutdown().await.context("Failed to close the audio socket")?;

    Ok(written)
}

/// Resolves once a stop was requested or the encoder handle is gone
async fn stopped(stop_rx: &mut watch::Receiver<bool>) {
    while !*stop_rx.borrow_and_update() {
        if stop_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn drain_video(index: usize, mut rx: mpsc::Receiver<VideoFrame>) {
    let mut frames = 0u64;
    while rx.recv().await.is_some() {
        frames += 1;
    }
    debug!("Video channel {} ended after {} frames (not encoded)", index, frames);
}
