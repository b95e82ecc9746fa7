//! Artifact assembly, naming and persistence

pub mod naming;
pub mod sink;
pub mod writer;

pub use naming::{artifact_name, room_from_title};
pub use sink::{sanitize_file_name, ArtifactSink, FileSink, PersistedArtifact};
pub use writer::{Artifact, ArtifactWriter};
