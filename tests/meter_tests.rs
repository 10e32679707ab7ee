// Integration tests for the live volume meter

use std::time::Duration;

use anyhow::Result;
use speech_capture::audio::{AudioFrame, MediaStream, MeterConfig, StreamFormat, VolumeMeter};

fn tone_frame(timestamp_ms: u64) -> AudioFrame {
    let samples = (0..480)
        .map(|i| 0.9 * (2.0 * std::f32::consts::PI * 500.0 * i as f32 / 48000.0).sin())
        .collect();
    AudioFrame {
        samples,
        sample_rate: 48000,
        channels: 1,
        timestamp_ms,
    }
}

async fn feed_until_loud(
    feed: &speech_capture::audio::TrackFeed,
    meter: &VolumeMeter,
) -> Result<()> {
    let mut volume = meter.subscribe();
    let mut timestamp_ms = 0;
    let heard = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            feed.push(tone_frame(timestamp_ms));
            timestamp_ms += 10;
            if *volume.borrow_and_update() > 0.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    anyhow::ensure!(heard.is_ok(), "meter never reported a level");
    Ok(())
}

#[tokio::test]
async fn test_no_updates_after_stop() -> Result<()> {
    let (stream, feed) = MediaStream::new(StreamFormat::default(), 256);
    let mut meter = VolumeMeter::new(MeterConfig { interval_ms: 5 });

    meter.start(stream.subscribe().expect("stream is open"));
    stream.activate();
    feed_until_loud(&feed, &meter).await?;
    assert!(meter.is_running());

    meter.stop().await;
    meter.reset();
    assert!(!meter.is_running());

    let mut volume = meter.subscribe();
    volume.borrow_and_update();

    // Frames still flow on the live stream, but nothing is published
    for i in 0..20 {
        feed.push(tone_frame(i * 10));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!volume.has_changed()?);
    assert_eq!(meter.volume(), 0.0);

    // Stopping twice is harmless
    meter.stop().await;

    Ok(())
}

#[tokio::test]
async fn test_loop_ends_when_tracks_stop() -> Result<()> {
    let (stream, feed) = MediaStream::new(StreamFormat::default(), 256);
    let mut meter = VolumeMeter::new(MeterConfig::default());

    meter.start(stream.subscribe().expect("stream is open"));
    stream.activate();
    feed_until_loud(&feed, &meter).await?;

    stream.stop_tracks();

    let ended = tokio::time::timeout(Duration::from_secs(1), async {
        while meter.is_running() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(ended.is_ok(), "meter kept running after the stream ended");

    Ok(())
}

#[tokio::test]
async fn test_meter_never_keeps_stream_alive() -> Result<()> {
    let (stream, feed) = MediaStream::new(StreamFormat::default(), 16);
    let mut meter = VolumeMeter::new(MeterConfig::default());

    meter.start(stream.subscribe().expect("stream is open"));
    stream.activate();

    drop(stream);

    assert!(feed.is_ended());
    assert!(!feed.push(tone_frame(0)));

    meter.stop().await;
    Ok(())
}
