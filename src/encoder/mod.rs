//! Incremental media encoding
//!
//! An [`Encoder`] attaches to a [`MixedStream`] and emits encoded chunks over
//! a channel while it runs. The channel closes after `stop()` has flushed the
//! final chunk.

pub mod wav;
pub mod webm;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::media::MixedStream;

pub use wav::{WavEncoder, WavEncoderFactory};
pub use webm::{WebmEncoder, WebmEncoderFactory, WebmSettings};

/// Output of a running encoder
#[derive(Debug, Clone)]
pub enum EncoderEvent {
    /// Next encoded fragment, in emission order
    Data(Bytes),
    /// The encoder faulted; no further data is trustworthy
    Error(String),
}

/// Encoder capability
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Attach to `stream` and start encoding
    ///
    /// Returns a channel receiver that will receive encoder events
    async fn start(&mut self, stream: MixedStream) -> Result<mpsc::Receiver<EncoderEvent>>;

    /// Stop encoding, flushing pending data before the event channel closes
    async fn stop(&mut self) -> Result<()>;

    /// MIME type of the produced container
    fn mime_type(&self) -> &str;

    /// File extension for artifacts of this container
    fn file_extension(&self) -> &str;
}

/// Creates a fresh encoder for each session
pub trait EncoderFactory: Send + Sync {
    fn create(&self) -> Box<dyn Encoder>;
}

impl<F> EncoderFactory for F
where
    F: Fn() -> Box<dyn Encoder> + Send + Sync,
{
    fn create(&self) -> Box<dyn Encoder> {
        self()
    }
}
