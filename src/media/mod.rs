//! Media model shared by the device layer, the mixer and the encoder
//!
//! Sources own their channels' controls; frames flow over tokio channels.

pub mod frame;
pub mod source;
pub mod stream;

pub use frame::{AudioFrame, VideoFrame};
pub use source::{AudioTrack, MediaSource, MediaTrack, SourceKind, TrackControl, VideoTrack};
pub use stream::MixedStream;
