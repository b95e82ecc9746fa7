use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use tracing::debug;

use super::naming::artifact_name;
use crate::encoder::Encoder;
use crate::session::EncodedChunk;

/// Final byte sequence of one completed recording
#[derive(Debug, Clone)]
pub struct Artifact {
    name: String,
    mime_type: String,
    extension: String,
    data: Bytes,
    chunk_count: usize,
    created_at: DateTime<Utc>,
}

impl Artifact {
    /// Generated name without extension
    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<name>.<extension>`
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name, self.extension)
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Assembles buffered chunks into an [`Artifact`]
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    mime_type: String,
    extension: String,
}

impl ArtifactWriter {
    pub fn new(mime_type: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            extension: extension.into(),
        }
    }

    /// Writer matching the container `encoder` produces
    pub fn for_encoder(encoder: &dyn Encoder) -> Self {
        Self::new(encoder.mime_type(), encoder.file_extension())
    }

    pub fn write(&self, chunks: &[EncodedChunk], name_hint: Option<&str>) -> Artifact {
        self.write_at(chunks, name_hint, Utc::now())
    }

    /// Concatenate chunk payloads in buffered order, named for `at`
    pub fn write_at(
        &self,
        chunks: &[EncodedChunk],
        name_hint: Option<&str>,
        at: DateTime<Utc>,
    ) -> Artifact {
        let total: usize = chunks.iter().map(EncodedChunk::len).sum();
        let mut data = BytesMut::with_capacity(total);
        for chunk in chunks {
            data.extend_from_slice(chunk.data());
        }

        let name = artifact_name(name_hint, at);
        debug!("Assembled {} from {} chunks ({} bytes)", name, chunks.len(), total);

        Artifact {
            name,
            mime_type: self.mime_type.clone(),
            extension: self.extension.clone(),
            data: data.freeze(),
            chunk_count: chunks.len(),
            created_at: at,
        }
    }
}
