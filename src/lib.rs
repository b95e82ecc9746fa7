pub mod artifact;
pub mod audio;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod encoder;
pub mod error;
pub mod http;
pub mod media;
pub mod session;

pub use artifact::{Artifact, ArtifactSink, ArtifactWriter, FileSink, PersistedArtifact};
pub use audio::{AudioFile, MixerConfig, SignalMixer};
pub use capture::{CaptureDevices, StreamAcquirer, SyntheticConfig, SyntheticDevices};
pub use config::{Config, EncoderKind};
pub use coordinator::{CoordinatorStatus, RecordingCoordinator, ToggleOutcome};
pub use encoder::{
    Encoder, EncoderEvent, EncoderFactory, WavEncoder, WavEncoderFactory, WebmEncoder,
    WebmEncoderFactory, WebmSettings,
};
pub use error::{AcquisitionError, RecorderError, RecorderResult};
pub use http::{create_router, AppState};
pub use media::{AudioFrame, MediaSource, MixedStream, SourceKind, TrackControl, VideoFrame};
pub use session::{
    CaptureSession, EncodedChunk, SessionConfig, SessionState, SessionStats, StopReason,
    StopReport,
};
