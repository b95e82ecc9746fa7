//! External control surface over capture sessions
//!
//! Holds at most one session at a time. A new session is created for every
//! start; the previous one is kept (with its retained chunks) until then so
//! that `save()` can still materialize it after a bare `stop()`.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::artifact::{room_from_title, Artifact, ArtifactWriter};
use crate::audio::SignalMixer;
use crate::capture::StreamAcquirer;
use crate::encoder::EncoderFactory;
use crate::error::{RecorderError, RecorderResult};
use crate::session::{CaptureSession, SessionConfig, SessionState, SessionStats, StopReport};

struct ActiveSession {
    session: CaptureSession,
    writer: ArtifactWriter,
}

/// Result of [`RecordingCoordinator::toggle`]
#[derive(Debug)]
pub enum ToggleOutcome {
    /// A start was attempted; `true` when the session reached Recording
    Started(bool),
    /// The running session was stopped and saved
    Saved(Artifact),
}

/// Snapshot of the coordinator for status queries
#[derive(Debug, Clone, Serialize)]
pub struct CoordinatorStatus {
    pub authority: bool,
    pub room: Option<String>,
    pub session: Option<SessionStats>,
}

pub struct RecordingCoordinator {
    acquirer: StreamAcquirer,
    mixer: SignalMixer,
    encoders: Arc<dyn EncoderFactory>,
    session_config: SessionConfig,
    current: Mutex<Option<ActiveSession>>,
    authority: AtomicBool,
    room: RwLock<Option<String>>,
}

impl RecordingCoordinator {
    pub fn new(
        acquirer: StreamAcquirer,
        mixer: SignalMixer,
        encoders: Arc<dyn EncoderFactory>,
        session_config: SessionConfig,
    ) -> Self {
        Self {
            acquirer,
            mixer,
            encoders,
            session_config,
            current: Mutex::new(None),
            authority: AtomicBool::new(false),
            room: RwLock::new(None),
        }
    }

    /// Start a fresh session
    ///
    /// Returns `Ok(true)` once Recording, `Ok(false)` when capture could not
    /// be started (the failed session stays inspectable through `status()`).
    /// Starting while a session is still live is an `InvalidState` error.
    pub async fn start(&self) -> RecorderResult<bool> {
        let (session, encoder) = {
            let mut current = self.current.lock().await;
            if let Some(active) = current.as_ref() {
                let state = active.session.state();
                if !state.is_terminal() {
                    warn!("Start rejected: session {} is {}", active.session.id(), state);
                    return Err(RecorderError::invalid_state("start", state));
                }
            }

            let session = CaptureSession::new(self.session_config.renewed());
            let encoder = self.encoders.create();
            let writer = ArtifactWriter::for_encoder(encoder.as_ref());

            *current = Some(ActiveSession {
                session: session.clone(),
                writer,
            });
            (session, encoder)
        };

        match session.start(&self.acquirer, &self.mixer, encoder).await {
            Ok(()) => Ok(true),
            Err(RecorderError::Acquisition(e)) => {
                warn!("Recording not started: {}", e);
                Ok(false)
            }
            Err(RecorderError::Encoding(e)) => {
                warn!("Recording not started: encoder failed: {}", e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Stop the current session without materializing an artifact
    pub async fn stop(&self) -> RecorderResult<Option<StopReport>> {
        let session = self.current_session().await?;
        session.stop().await
    }

    /// Materialize the current session's chunks, stopping it first if needed
    pub async fn save(&self) -> RecorderResult<Artifact> {
        let (session, writer) = {
            let current = self.current.lock().await;
            match current.as_ref() {
                Some(active) => (active.session.clone(), active.writer.clone()),
                None => return Err(RecorderError::invalid_state("save", SessionState::Idle)),
            }
        };

        let room = self.room_identifier().await;
        session.save(&writer, room.as_deref()).await
    }

    pub async fn stop_and_save(&self) -> RecorderResult<Artifact> {
        let session = self.current_session().await?;
        if session.state() == SessionState::Recording {
            session.stop().await?;
        }
        self.save().await
    }

    /// Start when nothing is recording, otherwise stop and save
    pub async fn toggle(&self) -> RecorderResult<ToggleOutcome> {
        let recording = match self.session().await {
            Some(session) => session.state() == SessionState::Recording,
            None => false,
        };

        if recording {
            info!("Toggle: stopping and saving");
            Ok(ToggleOutcome::Saved(self.stop_and_save().await?))
        } else {
            info!("Toggle: starting");
            Ok(ToggleOutcome::Started(self.start().await?))
        }
    }

    pub fn set_authority(&self, authority: bool) {
        self.authority.store(authority, Ordering::SeqCst);
        info!("Recording authority set to {}", authority);
    }

    pub fn has_authority(&self) -> bool {
        self.authority.load(Ordering::SeqCst)
    }

    pub async fn set_room_identifier(&self, identifier: Option<String>) {
        let identifier = identifier
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        info!("Room identifier: {:?}", identifier);
        *self.room.write().await = identifier;
    }

    /// Resolve the room from a `"<room> | <app>"` title
    ///
    /// Returns whether a room identifier could be resolved. The previous
    /// identifier is cleared when it could not.
    pub async fn set_room_title(&self, title: &str) -> bool {
        let room = room_from_title(title);
        let resolved = room.is_some();
        self.set_room_identifier(room).await;
        resolved
    }

    pub async fn room_identifier(&self) -> Option<String> {
        self.room.read().await.clone()
    }

    /// Handle to the current (or most recent) session
    pub async fn session(&self) -> Option<CaptureSession> {
        self.current
            .lock()
            .await
            .as_ref()
            .map(|active| active.session.clone())
    }

    pub async fn status(&self) -> CoordinatorStatus {
        let session = match self.session().await {
            Some(session) => Some(session.stats().await),
            None => None,
        };

        CoordinatorStatus {
            authority: self.has_authority(),
            room: self.room_identifier().await,
            session,
        }
    }

    async fn current_session(&self) -> RecorderResult<CaptureSession> {
        self.session()
            .await
            .ok_or_else(|| RecorderError::invalid_state("stop", SessionState::Idle))
    }
}
