use super::state::AppState;
use crate::error::RecorderError;
use crate::session::{SessionStats, StopReport};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct StartRecordingRequest {
    /// Room identifier used to name the artifact
    pub room: Option<String>,

    /// Window title of the form "<room> | <app>"; used when `room` is absent
    pub room_title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartRecordingResponse {
    pub session_id: String,
    pub status: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct StopRecordingResponse {
    pub status: String,
    /// Present when this request performed the stop
    pub report: Option<StopReport>,
    pub stats: Option<SessionStats>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorityBody {
    pub authority: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

fn recorder_error_response(e: RecorderError) -> Response {
    let status = match &e {
        RecorderError::InvalidState { .. } => StatusCode::CONFLICT,
        RecorderError::Acquisition(_) | RecorderError::Encoding(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    error_response(status, e.to_string())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /recording/start
/// Start a new recording session
pub async fn start_recording(
    State(state): State<AppState>,
    req: Option<Json<StartRecordingRequest>>,
) -> impl IntoResponse {
    let req = req.map(|Json(req)| req).unwrap_or_default();

    if let Some(room) = req.room {
        state.coordinator.set_room_identifier(Some(room)).await;
    } else if let Some(title) = req.room_title {
        if !state.coordinator.set_room_title(&title).await {
            warn!("Could not resolve a room from title {:?}", title);
        }
    }

    info!("Starting recording");

    match state.coordinator.start().await {
        Ok(true) => {
            let session_id = match state.coordinator.session().await {
                Some(session) => session.id().to_string(),
                None => String::new(),
            };
            info!("Recording started: {}", session_id);
            (
                StatusCode::OK,
                Json(StartRecordingResponse {
                    session_id: session_id.clone(),
                    status: "recording".to_string(),
                    message: format!("Recording started for session {}", session_id),
                }),
            )
                .into_response()
        }
        Ok(false) => {
            error!("Capture could not be started");
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "Capture could not be started",
            )
        }
        Err(e) => {
            error!("Failed to start recording: {}", e);
            recorder_error_response(e)
        }
    }
}

/// POST /recording/stop
/// Stop the current recording without saving
pub async fn stop_recording(State(state): State<AppState>) -> impl IntoResponse {
    info!("Stopping recording");

    match state.coordinator.stop().await {
        Ok(report) => {
            let stats = state.coordinator.status().await.session;
            (
                StatusCode::OK,
                Json(StopRecordingResponse {
                    status: "stopped".to_string(),
                    report,
                    stats,
                }),
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to stop recording: {}", e);
            recorder_error_response(e)
        }
    }
}

/// POST /recording/save
/// Stop if recording, then save and persist the artifact
pub async fn save_recording(State(state): State<AppState>) -> impl IntoResponse {
    let artifact = match state.coordinator.stop_and_save().await {
        Ok(artifact) => artifact,
        Err(e) => {
            error!("Failed to save recording: {}", e);
            return recorder_error_response(e);
        }
    };

    match state.sink.persist(&artifact).await {
        Ok(persisted) => (StatusCode::OK, Json(persisted)).into_response(),
        Err(e) => {
            error!("Failed to persist {}: {:#}", artifact.file_name(), e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to persist recording: {}", e),
            )
        }
    }
}

/// GET /recording/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.coordinator.status().await))
}

/// GET /recording/authority
pub async fn get_authority(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(AuthorityBody {
            authority: state.coordinator.has_authority(),
        }),
    )
}

/// PUT /recording/authority
pub async fn set_authority(
    State(state): State<AppState>,
    Json(body): Json<AuthorityBody>,
) -> impl IntoResponse {
    state.coordinator.set_authority(body.authority);
    (StatusCode::OK, Json(body))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
