// Integration tests for file and tone inputs driving a full session

mod common;

use std::time::Duration;

use anyhow::Result;
use common::{float_wav, read_i16};
use speech_capture::audio::{
    FileInput, InputConfig, InputDevice, InputFactory, InputSource, ToneInput, TrackState,
};
use speech_capture::{AudioSession, CaptureError, FailureKind, SessionConfig, SessionState};
use tempfile::TempDir;

#[tokio::test]
async fn test_stereo_file_round_trips_channel_major() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("interview.wav");

    // 0.25 seconds of 16 kHz stereo, left +0.5, right -0.5
    let interleaved: Vec<f32> = (0..4000).flat_map(|_| [0.5f32, -0.5f32]).collect();
    std::fs::write(&path, float_wav(16000, 2, &interleaved))?;

    let input = FileInput::new(&path, InputConfig::default()).unpaced();
    let mut session = AudioSession::new(SessionConfig::default(), std::sync::Arc::new(input));

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop().await?;

    assert_eq!(session.state(), SessionState::Ready);
    let asset = session.result().expect("recorded file");
    assert_eq!(asset.sample_rate, 16000);
    assert_eq!(asset.channels, 2);
    assert_eq!(asset.duration, Duration::from_millis(250));
    assert_eq!(asset.wav_bytes.len(), 44 + 4000 * 2 * 2);

    for i in [0usize, 1, 3999] {
        assert_eq!(read_i16(&asset.wav_bytes, 44 + i * 2), 16384);
    }
    for i in [4000usize, 4001, 7999] {
        assert_eq!(read_i16(&asset.wav_bytes, 44 + i * 2), -16384);
    }

    Ok(())
}

#[tokio::test]
async fn test_missing_file_is_device_unavailable() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let source: InputSource = format!("file:{}", temp_dir.path().join("nope.wav").display())
        .parse()
        .map_err(anyhow::Error::msg)?;
    let device = InputFactory::create(source, InputConfig::default())?;
    let mut session = AudioSession::new(SessionConfig::default(), device);

    let err = session.start().await.expect_err("file does not exist");

    assert!(matches!(err, CaptureError::DeviceUnavailable(_)));
    assert_eq!(
        session.state(),
        SessionState::Error(FailureKind::DeviceUnavailable)
    );

    Ok(())
}

#[tokio::test]
async fn test_tone_input_records_audio() -> Result<()> {
    let config = InputConfig {
        sample_rate: 8000,
        frame_ms: 10,
        ..Default::default()
    };
    let input = ToneInput::new(440.0, 0.5, config);
    let mut session = AudioSession::new(SessionConfig::default(), std::sync::Arc::new(input));

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(120)).await;
    session.stop().await?;

    let asset = session.result().expect("tone recording");
    assert_eq!(asset.sample_rate, 8000);
    assert_eq!(asset.channels, 1);
    assert!(asset.duration >= Duration::from_millis(50), "got {:?}", asset.duration);

    Ok(())
}

#[tokio::test]
async fn test_finished_file_ends_its_tracks() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("short.wav");
    std::fs::write(&path, float_wav(8000, 1, &[0.25f32; 800]))?;

    let input = FileInput::new(&path, InputConfig::default()).unpaced();
    let stream = input.open().await?;
    let mut tap = stream.subscribe().expect("stream is open");
    stream.activate();

    // Drain without ever calling stop_tracks
    let drained = tokio::time::timeout(Duration::from_secs(2), async {
        let mut samples = 0usize;
        while let Ok(frame) = tap.recv().await {
            samples += frame.samples.len();
        }
        samples
    })
    .await?;

    assert_eq!(drained, 800);
    assert_eq!(stream.track_state(), TrackState::Ended);
    assert!(stream.subscribe().is_none());

    Ok(())
}

#[tokio::test]
async fn test_session_over_finished_file_still_produces_asset() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("short.wav");
    std::fs::write(&path, float_wav(8000, 1, &[0.25f32; 800]))?;

    let input = FileInput::new(&path, InputConfig::default()).unpaced();
    let mut session = AudioSession::new(SessionConfig::default(), std::sync::Arc::new(input));

    session.start().await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.is_recording());

    session.stop().await?;

    let asset = session.result().expect("recorded file");
    assert_eq!(asset.duration, Duration::from_millis(100));
    assert_eq!(session.volume(), 0.0);

    Ok(())
}
