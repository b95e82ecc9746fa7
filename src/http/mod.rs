//! HTTP API for local control of the recorder
//!
//! - POST /recording/start - Start a new recording
//! - POST /recording/stop - Stop the current recording
//! - POST /recording/save - Stop (if recording), save and persist the artifact
//! - GET /recording/status - Coordinator and session status
//! - GET|PUT /recording/authority - Recording authority flag
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{AuthorityBody, ErrorResponse, StartRecordingRequest};
pub use routes::create_router;
pub use state::AppState;
