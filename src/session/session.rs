use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::buffer::ChunkBuffer;
use super::config::SessionConfig;
use super::state::SessionState;
use super::stats::{SessionStats, StopReason, StopReport};
use crate::artifact::{Artifact, ArtifactWriter};
use crate::audio::SignalMixer;
use crate::capture::StreamAcquirer;
use crate::encoder::{Encoder, EncoderEvent};
use crate::error::{RecorderError, RecorderResult};
use crate::media::{MediaSource, SourceKind, TrackControl};

/// One local recording, from Start to its terminal state
///
/// Cloning yields another handle to the same session. A session is used
/// once: after `Stopped` or `Failed`, create a new one.
#[derive(Clone)]
pub struct CaptureSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,

    /// Current state; observers subscribe to transitions
    state: watch::Sender<SessionState>,

    /// Encoded chunks in emission order
    buffer: Mutex<ChunkBuffer>,

    /// Everything held while Recording; taken by whichever stop arrives first
    running: Mutex<Option<Running>>,

    /// Set once a stop has begun, so the collector can tell a requested
    /// close from the encoder ending on its own
    stopping: AtomicBool,

    timeline: Mutex<Timeline>,
}

#[derive(Default)]
struct Timeline {
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    stop_reason: Option<StopReason>,
}

struct Running {
    sources: Vec<MediaSource>,
    mixed_audio: Arc<dyn TrackControl>,
    graph: Option<JoinHandle<()>>,
    encoder: Box<dyn Encoder>,
    collector: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
}

impl CaptureSession {
    pub fn new(config: SessionConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(Inner {
                config,
                state,
                buffer: Mutex::new(ChunkBuffer::new()),
                running: Mutex::new(None),
                stopping: AtomicBool::new(false),
                timeline: Mutex::new(Timeline::default()),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.config.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Wait until the session reaches `Stopped` or `Failed`
    pub async fn wait_for_terminal(&self) -> SessionState {
        let mut rx = self.inner.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            if state.is_terminal() {
                return state;
            }
            if rx.changed().await.is_err() {
                return self.state();
            }
        }
    }

    /// Acquire both sources, mix them, attach `encoder` and start recording
    ///
    /// Only legal from Idle. On any failure before Recording every acquired
    /// source is released and the session ends in Failed.
    pub async fn start(
        &self,
        acquirer: &StreamAcquirer,
        mixer: &SignalMixer,
        mut encoder: Box<dyn Encoder>,
    ) -> RecorderResult<()> {
        let entered = self.inner.state.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Acquiring;
                true
            } else {
                false
            }
        });
        if !entered {
            let state = self.state();
            warn!("Start rejected: session {} is {}", self.id(), state);
            return Err(RecorderError::invalid_state("start", state));
        }

        info!("Starting capture session: {}", self.id());

        let (microphone, display) = match acquirer.acquire().await {
            Ok(sources) => sources,
            Err(e) => {
                error!("Acquisition failed for session {}: {}", self.id(), e);
                self.inner.set_state(SessionState::Failed);
                return Err(e.into());
            }
        };

        let mut sources = vec![microphone, display];
        self.inner.set_state(SessionState::Mixing);

        let mut mixed = match mixer.mix(&mut sources) {
            Ok(mixed) => mixed,
            Err(e) => {
                error!("Mixing failed for session {}: {}", self.id(), e);
                release_all(&mut sources);
                self.inner.set_state(SessionState::Failed);
                return Err(e.into());
            }
        };

        let graph = mixed.take_graph();
        let mixed_audio = mixed.audio_control();
        let activity = sources
            .iter()
            .find(|s| s.kind() == SourceKind::DisplayCapture)
            .and_then(|s| s.activity());

        // Held until Recording is published, so a stop triggered by the
        // background tasks waits for the session to be fully running
        let mut running = self.inner.running.lock().await;

        self.inner.buffer.lock().await.start_clock();
        let events = match encoder.start(mixed).await {
            Ok(events) => events,
            Err(e) => {
                error!("Encoder failed to start for session {}: {:#}", self.id(), e);
                release_all(&mut sources);
                mixed_audio.stop();
                if let Some(graph) = graph {
                    graph.abort();
                }
                self.inner.set_state(SessionState::Failed);
                return Err(RecorderError::Encoding(e.to_string()));
            }
        };

        let collector = tokio::spawn(collect_chunks(Arc::clone(&self.inner), events));
        let watcher = activity.map(|rx| tokio::spawn(watch_surface(Arc::clone(&self.inner), rx)));

        *running = Some(Running {
            sources,
            mixed_audio,
            graph,
            encoder,
            collector,
            watcher,
        });
        self.inner.timeline.lock().await.started_at = Some(Utc::now());
        self.inner.set_state(SessionState::Recording);
        drop(running);

        info!("Capture session {} recording", self.id());
        Ok(())
    }

    /// Stop recording and release every source
    ///
    /// Returns the report when this call performed the transition, `None`
    /// when the session had already stopped.
    pub async fn stop(&self) -> RecorderResult<Option<StopReport>> {
        match self.state() {
            SessionState::Recording => Ok(self.inner.finish(StopReason::Requested).await),
            SessionState::Stopped => {
                debug!("Session {} already stopped", self.id());
                Ok(None)
            }
            state => Err(RecorderError::invalid_state("stop", state)),
        }
    }

    /// Stop if still recording, then build an artifact from the buffered chunks
    pub async fn save(
        &self,
        writer: &ArtifactWriter,
        name_hint: Option<&str>,
    ) -> RecorderResult<Artifact> {
        match self.state() {
            SessionState::Recording => {
                self.inner.finish(StopReason::Requested).await;
            }
            SessionState::Stopped => {}
            state => return Err(RecorderError::invalid_state("save", state)),
        }

        let buffer = self.inner.buffer.lock().await;
        let artifact = writer.write(buffer.chunks(), name_hint);

        info!(
            "Session {} saved as {} ({} bytes from {} chunks)",
            self.id(),
            artifact.file_name(),
            artifact.len(),
            buffer.len()
        );

        Ok(artifact)
    }

    /// Get current session statistics
    pub async fn stats(&self) -> SessionStats {
        let (chunks_count, bytes_buffered, discarded_empty_chunks) = {
            let buffer = self.inner.buffer.lock().await;
            (buffer.len(), buffer.total_bytes(), buffer.discarded_empty())
        };

        let timeline = self.inner.timeline.lock().await;
        let duration_secs = match timeline.started_at {
            Some(started) => {
                let end = timeline.stopped_at.unwrap_or_else(Utc::now);
                end.signed_duration_since(started).num_milliseconds() as f64 / 1000.0
            }
            None => 0.0,
        };

        SessionStats {
            session_id: self.id().to_string(),
            state: self.state(),
            started_at: timeline.started_at,
            duration_secs,
            chunks_count,
            bytes_buffered,
            discarded_empty_chunks,
            stop_reason: timeline.stop_reason.clone(),
        }
    }
}

impl Inner {
    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        info!(
            "Session {}: {} -> {}",
            self.config.session_id, previous, state
        );
    }

    /// Recording -> Stopped; only the first caller performs it
    async fn finish(&self, reason: StopReason) -> Option<StopReport> {
        let mut guard = self.running.lock().await;
        let mut running = guard.take()?;
        self.stopping.store(true, Ordering::SeqCst);

        info!("Stopping session {} ({})", self.config.session_id, reason);

        if let Some(watcher) = running.watcher.take() {
            watcher.abort();
        }

        if let Err(e) = running.encoder.stop().await {
            warn!("Encoder did not stop cleanly: {:#}", e);
        }

        // The collector ends once the encoder has closed its output
        match tokio::time::timeout(self.config.flush_timeout, &mut running.collector).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Chunk collector failed: {}", e),
            Err(_) => {
                warn!(
                    "Encoder flush exceeded {:?}, discarding unflushed chunks",
                    self.config.flush_timeout
                );
                running.collector.abort();
            }
        }

        let tracks_released = release_all(&mut running.sources);
        running.mixed_audio.stop();
        if let Some(graph) = running.graph.take() {
            graph.abort();
        }

        let (chunks, bytes) = {
            let buffer = self.buffer.lock().await;
            (buffer.len(), buffer.total_bytes())
        };

        {
            let mut timeline = self.timeline.lock().await;
            timeline.stopped_at = Some(Utc::now());
            timeline.stop_reason = Some(reason.clone());
        }

        self.set_state(SessionState::Stopped);
        drop(guard);

        info!(
            "Session {} stopped: {} channels released, {} chunks ({} bytes) buffered",
            self.config.session_id, tracks_released, chunks, bytes
        );

        Some(StopReport {
            reason,
            tracks_released,
            chunks,
            bytes,
        })
    }
}

fn release_all(sources: &mut [MediaSource]) -> usize {
    sources.iter_mut().map(|s| s.release()).sum()
}

/// Buffer encoder output in emission order until the encoder closes it
async fn collect_chunks(inner: Arc<Inner>, mut events: mpsc::Receiver<EncoderEvent>) {
    let mut faulted = false;

    while let Some(event) = events.recv().await {
        match event {
            EncoderEvent::Data(data) => {
                if faulted {
                    debug!("Dropping {} bytes emitted after encoder fault", data.len());
                    continue;
                }
                let len = data.len();
                let mut buffer = inner.buffer.lock().await;
                if !buffer.push(data) {
                    debug!("Discarded zero-length chunk");
                } else {
                    debug!("Buffered chunk {} ({} bytes)", buffer.len() - 1, len);
                }
            }
            EncoderEvent::Error(message) => {
                if faulted {
                    continue;
                }
                faulted = true;
                error!("Encoder fault in session {}: {}", inner.config.session_id, message);
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    inner.finish(StopReason::EncoderFault(message)).await;
                });
            }
        }
    }

    if !faulted && !inner.stopping.load(Ordering::SeqCst) {
        warn!("Encoder output ended without a stop request");
        tokio::spawn(async move {
            inner.finish(StopReason::EncoderEnded).await;
        });
    }
}

/// Stop the session once the display surface reports itself inactive
async fn watch_surface(inner: Arc<Inner>, mut activity: watch::Receiver<bool>) {
    loop {
        let active = *activity.borrow_and_update();
        if !active {
            break;
        }
        if activity.changed().await.is_err() {
            debug!("Display activity signal dropped");
            break;
        }
    }

    info!("Capture surface inactive, stopping session {}", inner.config.session_id);
    tokio::spawn(async move {
        inner.finish(StopReason::SurfaceInactive).await;
    });
}
