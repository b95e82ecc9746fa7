use async_trait::async_trait;
use futures::future::{self, BoxFuture, Either, FutureExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::AcquisitionError;
use crate::media::MediaSource;

/// Device capability boundary
///
/// Implementations:
/// - Synthetic: generated tone / frames, or a WAV file as microphone
/// - Tests: scripted devices with counting controls
#[async_trait]
pub trait CaptureDevices: Send + Sync {
    /// Open an audio-only microphone source
    async fn open_microphone(&self) -> Result<MediaSource, AcquisitionError>;

    /// Open a screen/window capture source, with the surface's own audio if it has one
    async fn open_display(&self) -> Result<MediaSource, AcquisitionError>;

    /// Device layer name for logging
    fn name(&self) -> &str;
}

type Request = BoxFuture<'static, Result<MediaSource, AcquisitionError>>;

/// Obtains the microphone and display sources for one session
pub struct StreamAcquirer {
    devices: Arc<dyn CaptureDevices>,
}

impl StreamAcquirer {
    pub fn new(devices: Arc<dyn CaptureDevices>) -> Self {
        Self { devices }
    }

    /// Acquire `(microphone, display)`
    ///
    /// Both requests are issued together. The first failure is returned
    /// immediately and whatever was already granted is released; a request
    /// still pending at that point keeps running in the background and its
    /// source is released as soon as it is granted.
    pub async fn acquire(&self) -> Result<(MediaSource, MediaSource), AcquisitionError> {
        info!("Requesting microphone and display capture from {}", self.devices.name());

        let devices = Arc::clone(&self.devices);
        let microphone: Request = async move { devices.open_microphone().await }.boxed();
        let devices = Arc::clone(&self.devices);
        let display: Request = async move { devices.open_display().await }.boxed();

        let (microphone, screen) = match future::select(microphone, display).await {
            Either::Left((Ok(microphone), display)) => match display.await {
                Ok(screen) => (microphone, screen),
                Err(e) => return Err(abandon("Display capture", e, microphone)),
            },
            Either::Left((Err(e), display)) => {
                warn!("Microphone capture failed: {}", e);
                release_when_granted("display capture", display);
                return Err(e);
            }
            Either::Right((Ok(screen), microphone)) => match microphone.await {
                Ok(microphone) => (microphone, screen),
                Err(e) => return Err(abandon("Microphone capture", e, screen)),
            },
            Either::Right((Err(e), microphone)) => {
                warn!("Display capture failed: {}", e);
                release_when_granted("microphone", microphone);
                return Err(e);
            }
        };

        let (mic_channels, mic_video) = (microphone.audio_channel_count(), microphone.has_video());
        info!(
            "Microphone granted: {} audio channels, video={}",
            mic_channels, mic_video
        );
        let (screen_channels, screen_video) = (screen.audio_channel_count(), screen.has_video());
        info!(
            "Display capture granted: {} audio channels, video={}",
            screen_channels, screen_video
        );

        Ok((microphone, screen))
    }
}

/// Release the source granted by the other request and pass the failure on
fn abandon(what: &str, error: AcquisitionError, mut granted: MediaSource) -> AcquisitionError {
    warn!("{} failed: {}. Releasing {}.", what, error, granted.kind());
    granted.release();
    error
}

/// Let a request finish on its own and release its source if it is granted
fn release_when_granted(what: &'static str, request: Request) {
    tokio::spawn(async move {
        match request.await {
            Ok(mut source) => {
                let released = source.release();
                info!("Late {} grant released ({} channels)", what, released);
            }
            Err(e) => debug!("Pending {} request also failed: {}", what, e),
        }
    });
}
