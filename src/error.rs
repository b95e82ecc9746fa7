//! Error kinds surfaced by the recorder core

use thiserror::Error;

use crate::session::SessionState;

/// Device or permission failure while obtaining a media source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AcquisitionError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Device busy: {0}")]
    DeviceBusy(String),

    #[error("No capture surface selected")]
    NoSurfaceSelected,

    #[error("Capture not supported: {0}")]
    Unsupported(String),

    #[error("Audio graph unavailable: {0}")]
    GraphUnavailable(String),
}

/// Errors reported by capture sessions and the coordinator
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Encoding failure: {0}")]
    Encoding(String),
}

impl RecorderError {
    pub fn invalid_state(operation: &'static str, state: SessionState) -> Self {
        Self::InvalidState { operation, state }
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;
