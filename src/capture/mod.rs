pub mod acquirer;
pub mod synthetic;

pub use acquirer::{CaptureDevices, StreamAcquirer};
pub use synthetic::{SyntheticConfig, SyntheticDevices};
