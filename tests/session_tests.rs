// Integration tests for the capture session lifecycle
//
// These tests drive a session against fake devices and a scripted encoder and
// verify state transitions, chunk buffering and release of every channel.

mod common;

use anyhow::Result;
use chrono::DateTime;
use common::{eventually, FakeDevices, FakeEncoder, FakeEncoderHandle};
use meeting_recorder::{
    AcquisitionError, ArtifactWriter, CaptureSession, MixerConfig, RecorderError, SessionConfig,
    SessionState, SignalMixer, StopReason, StreamAcquirer, WavEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

struct Harness {
    devices: Arc<FakeDevices>,
    acquirer: StreamAcquirer,
    mixer: SignalMixer,
    session: CaptureSession,
}

fn harness(devices: FakeDevices) -> Harness {
    let devices = Arc::new(devices);
    Harness {
        acquirer: StreamAcquirer::new(devices.clone()),
        devices,
        mixer: SignalMixer::new(MixerConfig::default()),
        session: CaptureSession::new(SessionConfig {
            flush_timeout: Duration::from_secs(2),
            ..SessionConfig::default()
        }),
    }
}

async fn start_recording(h: &Harness) -> Result<FakeEncoderHandle> {
    let handle = FakeEncoderHandle::default();
    h.session
        .start(&h.acquirer, &h.mixer, Box::new(FakeEncoder::new(handle.clone())))
        .await?;
    Ok(handle)
}

async fn wait_terminal(session: &CaptureSession) -> Result<SessionState> {
    Ok(tokio::time::timeout(Duration::from_secs(5), session.wait_for_terminal()).await?)
}

#[tokio::test]
async fn test_record_stop_save_end_to_end() -> Result<()> {
    let h = harness(FakeDevices::new());
    let encoder = start_recording(&h).await?;

    assert_eq!(h.session.state(), SessionState::Recording);
    assert_eq!(encoder.video_tracks(), 1, "Display video should reach the encoder");

    assert!(encoder.emit(&[1u8; 10]).await);
    assert!(encoder.emit(&[]).await);
    assert!(encoder.emit(&[2u8; 20]).await);

    let report = h.session.stop().await?.expect("first stop performs the transition");
    assert_eq!(report.reason, StopReason::Requested);
    assert_eq!(report.chunks, 2);
    assert_eq!(report.bytes, 30);
    assert_eq!(h.session.state(), SessionState::Stopped);

    let writer = ArtifactWriter::new("video/x-fake", "fake");
    let artifact = h.session.save(&writer, None).await?;

    assert_eq!(artifact.len(), 30);
    assert_eq!(&artifact.bytes()[..10], &[1u8; 10]);
    assert_eq!(&artifact.bytes()[10..], &[2u8; 20]);

    let timestamp = artifact
        .name()
        .strip_prefix("recording_")
        .expect("fallback name prefix");
    assert!(DateTime::parse_from_rfc3339(timestamp).is_ok(), "bad timestamp {}", timestamp);

    let stats = h.session.stats().await;
    assert_eq!(stats.discarded_empty_chunks, 1);

    Ok(())
}

#[tokio::test]
async fn test_save_uses_room_hint() -> Result<()> {
    let h = harness(FakeDevices::new());
    let encoder = start_recording(&h).await?;
    encoder.emit(b"abc").await;

    // Save straight from Recording stops first
    let writer = ArtifactWriter::new("video/x-fake", "fake");
    let artifact = h.session.save(&writer, Some("weekly-sync")).await?;

    assert_eq!(h.session.state(), SessionState::Stopped);
    assert!(artifact.name().starts_with("weekly-sync_"));
    assert!(artifact.file_name().ends_with(".fake"));
    assert_eq!(artifact.bytes().as_ref(), b"abc");
    assert!(h.devices.all_stopped_once());

    Ok(())
}

#[tokio::test]
async fn test_stop_releases_every_channel_once() -> Result<()> {
    let h = harness(FakeDevices::new());
    start_recording(&h).await?;

    let opened = h.devices.opened_channels();
    assert_eq!(opened, 3, "microphone, display video and display audio");

    let report = h.session.stop().await?.expect("report");
    assert_eq!(report.tracks_released, opened);

    let second = h.session.stop().await?;
    assert!(second.is_none(), "second stop should be a no-op");

    assert!(h.devices.all_stopped_once());
    assert_eq!(h.devices.total_stops(), opened);

    Ok(())
}

#[tokio::test]
async fn test_display_without_audio_still_records() -> Result<()> {
    let h = harness(FakeDevices::new().without_display_audio());
    let encoder = start_recording(&h).await?;

    assert_eq!(h.devices.opened_channels(), 2);
    encoder.emit(&[7u8; 4]).await;

    let report = h.session.stop().await?.expect("report");
    assert_eq!(report.tracks_released, 2);
    assert_eq!(report.bytes, 4);

    Ok(())
}

#[tokio::test]
async fn test_microphone_denied_releases_display() -> Result<()> {
    let h = harness(
        FakeDevices::new().deny_microphone(AcquisitionError::PermissionDenied("microphone".into())),
    );
    let handle = FakeEncoderHandle::default();

    let result = h
        .session
        .start(&h.acquirer, &h.mixer, Box::new(FakeEncoder::new(handle.clone())))
        .await;

    assert!(matches!(
        result,
        Err(RecorderError::Acquisition(AcquisitionError::PermissionDenied(_)))
    ));
    assert_eq!(h.session.state(), SessionState::Failed);
    assert!(!handle.started(), "Encoder must not start after failed acquisition");

    // The display grant may land after the failure was reported
    assert!(eventually(|| h.devices.opened_channels() == 2).await, "display was granted");
    assert!(eventually(|| h.devices.all_stopped_once()).await);

    let stats = h.session.stats().await;
    assert_eq!(stats.chunks_count, 0);

    Ok(())
}

#[tokio::test]
async fn test_display_denied_releases_microphone() -> Result<()> {
    let h = harness(FakeDevices::new().deny_display(AcquisitionError::NoSurfaceSelected));

    let result = h
        .session
        .start(
            &h.acquirer,
            &h.mixer,
            Box::new(FakeEncoder::new(FakeEncoderHandle::default())),
        )
        .await;

    assert!(matches!(
        result,
        Err(RecorderError::Acquisition(AcquisitionError::NoSurfaceSelected))
    ));
    assert_eq!(h.session.state(), SessionState::Failed);
    assert_eq!(h.devices.opened_channels(), 1);
    assert!(h.devices.all_stopped_once());

    Ok(())
}

#[tokio::test]
async fn test_encoder_start_failure_fails_session() -> Result<()> {
    let h = harness(FakeDevices::new());

    let result = h
        .session
        .start(
            &h.acquirer,
            &h.mixer,
            Box::new(FakeEncoder::failing(FakeEncoderHandle::default())),
        )
        .await;

    assert!(matches!(result, Err(RecorderError::Encoding(_))));
    assert_eq!(h.session.state(), SessionState::Failed);
    assert!(h.devices.all_stopped_once());

    Ok(())
}

#[tokio::test]
async fn test_start_while_recording_is_invalid() -> Result<()> {
    let h = harness(FakeDevices::new());
    start_recording(&h).await?;
    let opened = h.devices.opened_channels();

    let result = h
        .session
        .start(
            &h.acquirer,
            &h.mixer,
            Box::new(FakeEncoder::new(FakeEncoderHandle::default())),
        )
        .await;

    assert!(matches!(
        result,
        Err(RecorderError::InvalidState {
            operation: "start",
            state: SessionState::Recording
        })
    ));
    assert_eq!(h.session.state(), SessionState::Recording);
    assert_eq!(h.devices.opened_channels(), opened, "No new acquisition");

    h.session.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_session_cannot_restart_after_stop() -> Result<()> {
    let h = harness(FakeDevices::new());
    start_recording(&h).await?;
    h.session.stop().await?;

    let result = start_recording(&h).await;
    assert!(result.is_err());
    assert_eq!(h.session.state(), SessionState::Stopped);

    Ok(())
}

#[tokio::test]
async fn test_stop_and_save_in_idle_are_invalid() {
    let h = harness(FakeDevices::new());

    assert!(matches!(
        h.session.stop().await,
        Err(RecorderError::InvalidState {
            operation: "stop",
            state: SessionState::Idle
        })
    ));

    let writer = ArtifactWriter::new("video/x-fake", "fake");
    assert!(matches!(
        h.session.save(&writer, None).await,
        Err(RecorderError::InvalidState {
            operation: "save",
            state: SessionState::Idle
        })
    ));
}

#[tokio::test]
async fn test_stop_after_failure_is_invalid() {
    let h = harness(FakeDevices::new().deny_display(AcquisitionError::DeviceBusy("screen".into())));
    let _ = start_recording(&h).await;

    assert!(matches!(
        h.session.stop().await,
        Err(RecorderError::InvalidState {
            state: SessionState::Failed,
            ..
        })
    ));
}

#[tokio::test]
async fn test_inactive_surface_stops_session() -> Result<()> {
    let h = harness(FakeDevices::new());
    let encoder = start_recording(&h).await?;
    encoder.emit(&[3u8; 12]).await;

    h.devices.revoke_surface();

    assert_eq!(wait_terminal(&h.session).await?, SessionState::Stopped);
    assert!(h.devices.all_stopped_once());
    assert_eq!(encoder.stops(), 1);

    let stats = h.session.stats().await;
    assert_eq!(stats.stop_reason, Some(StopReason::SurfaceInactive));
    assert_eq!(stats.bytes_buffered, 12);

    // An explicit stop afterwards is a no-op, not a second release
    assert!(h.session.stop().await?.is_none());
    assert!(h.devices.all_stopped_once());

    Ok(())
}

#[tokio::test]
async fn test_encoder_fault_keeps_buffered_chunks() -> Result<()> {
    let h = harness(FakeDevices::new());
    let encoder = start_recording(&h).await?;

    encoder.emit(&[5u8; 8]).await;
    encoder.emit(&[6u8; 8]).await;
    encoder.fault("muxer crashed").await;

    assert_eq!(wait_terminal(&h.session).await?, SessionState::Stopped);
    assert!(h.devices.all_stopped_once());

    let stats = h.session.stats().await;
    assert_eq!(
        stats.stop_reason,
        Some(StopReason::EncoderFault("muxer crashed".to_string()))
    );
    assert_eq!(stats.chunks_count, 2);

    let writer = ArtifactWriter::new("video/x-fake", "fake");
    let artifact = h.session.save(&writer, None).await?;
    assert_eq!(artifact.len(), 16);

    Ok(())
}

#[tokio::test]
async fn test_encoder_ending_on_its_own_stops_session() -> Result<()> {
    let h = harness(FakeDevices::new());
    let encoder = start_recording(&h).await?;
    encoder.emit(&[1u8; 5]).await;

    encoder.close();

    assert_eq!(wait_terminal(&h.session).await?, SessionState::Stopped);
    assert!(h.devices.all_stopped_once());

    let stats = h.session.stats().await;
    assert_eq!(stats.stop_reason, Some(StopReason::EncoderEnded));
    assert_eq!(stats.bytes_buffered, 5);

    Ok(())
}

#[tokio::test]
async fn test_state_transitions_are_observable() -> Result<()> {
    let h = harness(FakeDevices::new());
    let mut states = h.session.subscribe();
    assert_eq!(*states.borrow_and_update(), SessionState::Idle);

    start_recording(&h).await?;
    assert_eq!(*states.borrow_and_update(), SessionState::Recording);

    h.session.stop().await?;
    assert_eq!(*states.borrow_and_update(), SessionState::Stopped);
    assert!(h.session.state().is_terminal());

    Ok(())
}

#[tokio::test]
async fn test_start_while_acquiring_is_invalid() -> Result<()> {
    let gate = Arc::new(Notify::new());
    let h = harness(FakeDevices::new().gate_microphone(gate.clone()));
    let mut states = h.session.subscribe();

    let first = h.session.start(
        &h.acquirer,
        &h.mixer,
        Box::new(FakeEncoder::new(FakeEncoderHandle::default())),
    );
    let second = async {
        states.wait_for(|s| *s == SessionState::Acquiring).await?;

        let result = h
            .session
            .start(
                &h.acquirer,
                &h.mixer,
                Box::new(FakeEncoder::new(FakeEncoderHandle::default())),
            )
            .await;
        let state = h.session.state();

        gate.notify_one();
        Ok::<_, anyhow::Error>((result, state))
    };

    let (first, second) = tokio::join!(first, second);
    let (result, state) = second?;

    assert!(matches!(
        result,
        Err(RecorderError::InvalidState {
            operation: "start",
            state: SessionState::Acquiring
        })
    ));
    assert_eq!(state, SessionState::Acquiring, "Rejected start leaves the state alone");

    first?;
    assert_eq!(h.session.state(), SessionState::Recording);
    assert_eq!(h.devices.opened_channels(), 3, "Only the first start acquired");

    h.session.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_racing_surface_loss_releases_once() -> Result<()> {
    for _ in 0..20 {
        let h = harness(FakeDevices::new());
        let encoder = start_recording(&h).await?;

        let session = h.session.clone();
        let explicit = tokio::spawn(async move { session.stop().await });
        h.devices.revoke_surface();

        let report = explicit.await??;
        assert_eq!(wait_terminal(&h.session).await?, SessionState::Stopped);

        assert!(h.devices.all_stopped_once());
        assert_eq!(encoder.stops(), 1);

        // Exactly one of the two triggers performed the transition
        let reason = h.session.stats().await.stop_reason;
        match report {
            Some(report) => {
                assert_eq!(report.reason, StopReason::Requested);
                assert_eq!(reason, Some(StopReason::Requested));
                assert_eq!(report.tracks_released, 3);
            }
            None => assert_eq!(reason, Some(StopReason::SurfaceInactive)),
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_microphone_disconnect_keeps_recording() -> Result<()> {
    let h = harness(FakeDevices::new().without_display_audio());
    let encoder = WavEncoder::new(WavEncoder::pcm16(48000, 1), Duration::from_millis(50))?;
    h.session
        .start(&h.acquirer, &h.mixer, Box::new(encoder))
        .await?;

    // The only audio input goes away; the mix carries silence from here on
    h.devices.end_audio();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(h.session.state(), SessionState::Recording);

    let report = h.session.stop().await?.expect("report");
    assert_eq!(report.reason, StopReason::Requested);
    assert!(report.bytes > 44, "silence after the disconnect was encoded");
    assert!(h.devices.all_stopped_once());

    Ok(())
}
