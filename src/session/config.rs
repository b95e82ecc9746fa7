use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "session-7d3c…")
    pub session_id: String,

    /// How long a stop waits for the encoder to flush its last chunks
    /// Default: 5 seconds
    pub flush_timeout: Duration,
}

impl SessionConfig {
    /// Same settings under a freshly generated session ID
    pub fn renewed(&self) -> Self {
        Self {
            session_id: new_session_id(),
            ..self.clone()
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: new_session_id(),
            flush_timeout: Duration::from_secs(5),
        }
    }
}

fn new_session_id() -> String {
    format!("session-{}", uuid::Uuid::new_v4())
}
