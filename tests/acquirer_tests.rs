// Integration tests for stream acquisition
//
// These tests verify that both requests run together, that the first failure
// is reported without waiting on the other request, and that nothing granted
// is left open.

mod common;

use anyhow::Result;
use common::{eventually, FakeDevices};
use meeting_recorder::{AcquisitionError, SourceKind, StreamAcquirer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[tokio::test]
async fn test_acquire_returns_both_sources() -> Result<()> {
    let devices = Arc::new(FakeDevices::new());
    let acquirer = StreamAcquirer::new(devices.clone());

    let (mut microphone, mut screen) = acquirer.acquire().await?;

    assert_eq!(microphone.kind(), SourceKind::Microphone);
    assert_eq!(microphone.audio_channel_count(), 1);
    assert!(!microphone.has_video());
    assert_eq!(screen.kind(), SourceKind::DisplayCapture);
    assert_eq!(screen.audio_channel_count(), 1);
    assert!(screen.has_video());

    microphone.release();
    screen.release();
    assert!(devices.all_stopped_once());
    Ok(())
}

#[tokio::test]
async fn test_failure_does_not_wait_for_pending_microphone() -> Result<()> {
    // The microphone prompt is never answered
    let gate = Arc::new(Notify::new());
    let devices = Arc::new(
        FakeDevices::new()
            .gate_microphone(gate.clone())
            .deny_display(AcquisitionError::NoSurfaceSelected),
    );
    let acquirer = StreamAcquirer::new(devices.clone());

    let result = tokio::time::timeout(Duration::from_secs(2), acquirer.acquire()).await?;

    assert!(matches!(result, Err(AcquisitionError::NoSurfaceSelected)));
    assert_eq!(devices.opened_channels(), 0);
    Ok(())
}

#[tokio::test]
async fn test_late_grant_is_released() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let devices = Arc::new(
        FakeDevices::new()
            .gate_microphone(gate.clone())
            .deny_display(AcquisitionError::PermissionDenied("screen".into())),
    );
    let acquirer = StreamAcquirer::new(devices.clone());

    assert!(acquirer.acquire().await.is_err());

    // The user answers the microphone prompt after the failure was reported
    gate.notify_one();

    assert!(eventually(|| devices.opened_channels() == 1).await);
    assert!(eventually(|| devices.all_stopped_once()).await);
    Ok(())
}

#[tokio::test]
async fn test_microphone_failure_releases_granted_display() -> Result<()> {
    let devices = Arc::new(
        FakeDevices::new().deny_microphone(AcquisitionError::DeviceBusy("microphone".into())),
    );
    let acquirer = StreamAcquirer::new(devices.clone());

    let result = acquirer.acquire().await;

    assert!(matches!(result, Err(AcquisitionError::DeviceBusy(_))));
    assert!(eventually(|| devices.opened_channels() == 2).await);
    assert!(eventually(|| devices.all_stopped_once()).await);
    Ok(())
}
