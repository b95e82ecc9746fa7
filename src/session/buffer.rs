use bytes::Bytes;
use std::time::Instant;

/// One immutable encoded fragment, as buffered
#[derive(Debug, Clone)]
pub struct EncodedChunk {
    sequence: u64,
    offset_ms: u64,
    data: Bytes,
}

impl EncodedChunk {
    pub fn new(sequence: u64, offset_ms: u64, data: Bytes) -> Self {
        Self {
            sequence,
            offset_ms,
            data,
        }
    }

    /// Position in emission order, starting at 0
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Milliseconds since recording started when the chunk was buffered
    pub fn offset_ms(&self) -> u64 {
        self.offset_ms
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Append-only store of encoded chunks in emission order
#[derive(Debug)]
pub struct ChunkBuffer {
    chunks: Vec<EncodedChunk>,
    total_bytes: usize,
    discarded_empty: usize,
    started: Instant,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self {
            chunks: Vec::new(),
            total_bytes: 0,
            discarded_empty: 0,
            started: Instant::now(),
        }
    }

    /// Restart the offset clock; called as the encoder starts
    pub fn start_clock(&mut self) {
        self.started = Instant::now();
    }

    /// Append `data`; zero-length chunks are discarded
    ///
    /// Returns whether the chunk was kept.
    pub fn push(&mut self, data: Bytes) -> bool {
        if data.is_empty() {
            self.discarded_empty += 1;
            return false;
        }

        let chunk = EncodedChunk::new(
            self.chunks.len() as u64,
            self.started.elapsed().as_millis() as u64,
            data,
        );
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        true
    }

    pub fn chunks(&self) -> &[EncodedChunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn discarded_empty(&self) -> usize {
        self.discarded_empty
    }
}

impl Default for ChunkBuffer {
    fn default() -> Self {
        Self::new()
    }
}
