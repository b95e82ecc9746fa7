use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use super::writer::Artifact;

/// Where a persisted artifact ended up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedArtifact {
    pub name: String,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Persistence collaborator that takes delivery of finished artifacts
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn persist(&self, artifact: &Artifact) -> Result<PersistedArtifact>;
}

/// Writes artifacts as files into a directory
#[derive(Debug, Clone)]
pub struct FileSink {
    dir: PathBuf,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ArtifactSink for FileSink {
    async fn persist(&self, artifact: &Artifact) -> Result<PersistedArtifact> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create recordings directory: {:?}", self.dir))?;

        let file_name = sanitize_file_name(&artifact.file_name());
        let path = self.dir.join(&file_name);

        tokio::fs::write(&path, artifact.bytes())
            .await
            .with_context(|| format!("Failed to write artifact: {:?}", path))?;

        info!("Persisted {} ({} bytes) to {:?}", artifact.name(), artifact.len(), path);

        Ok(PersistedArtifact {
            name: file_name,
            path,
            bytes: artifact.len(),
        })
    }
}

/// Replace characters that are not safe in file names across platforms
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
