//! Capture session management
//!
//! This module provides the `CaptureSession` state machine that:
//! - Acquires the microphone and display sources
//! - Mixes them into one stream and drives the encoder
//! - Buffers encoded chunks in emission order
//! - Releases every source exactly once on the way to a terminal state

mod buffer;
mod config;
mod session;
mod state;
mod stats;

pub use buffer::{ChunkBuffer, EncodedChunk};
pub use config::SessionConfig;
pub use session::CaptureSession;
pub use state::SessionState;
pub use stats::{SessionStats, StopReason, StopReport};
