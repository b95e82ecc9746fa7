pub mod file;
pub mod mixer;

pub use file::AudioFile;
pub use mixer::{concat_video, sum_frames, MixerConfig, SignalMixer, MIXED_AUDIO_TRACK_ID};
