use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::state::SessionState;

/// Why a session left Recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// Explicit stop or save by the caller
    Requested,
    /// The capture surface went inactive on its own
    SurfaceInactive,
    /// The encoder reported a fault
    EncoderFault(String),
    /// The encoder's output ended without a stop request
    EncoderEnded,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => write!(f, "requested"),
            StopReason::SurfaceInactive => write!(f, "capture surface inactive"),
            StopReason::EncoderFault(msg) => write!(f, "encoder fault: {}", msg),
            StopReason::EncoderEnded => write!(f, "encoder output ended"),
        }
    }
}

/// Outcome of the transition that stopped a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopReport {
    pub reason: StopReason,
    /// Source channels stopped during release
    pub tracks_released: usize,
    /// Chunks buffered over the whole session
    pub chunks: usize,
    /// Bytes buffered over the whole session
    pub bytes: usize,
}

/// Statistics about a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub state: SessionState,

    /// When the session reached Recording
    pub started_at: Option<DateTime<Utc>>,

    /// Time spent recording so far, in seconds
    pub duration_secs: f64,

    /// Number of encoded chunks buffered
    pub chunks_count: usize,

    /// Total buffered bytes
    pub bytes_buffered: usize,

    /// Zero-length chunks the encoder emitted and the buffer dropped
    pub discarded_empty_chunks: usize,

    pub stop_reason: Option<StopReason>,
}
