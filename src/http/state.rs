use crate::artifact::ArtifactSink;
use crate::coordinator::RecordingCoordinator;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RecordingCoordinator>,

    /// Where saved recordings are delivered
    pub sink: Arc<dyn ArtifactSink>,
}

impl AppState {
    pub fn new(coordinator: Arc<RecordingCoordinator>, sink: Arc<dyn ArtifactSink>) -> Self {
        Self { coordinator, sink }
    }
}
