use std::f32::consts::PI;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::decoder::DecodedAudio;
use super::stream::{AudioFrame, MediaStream, StreamFormat, TrackFeed};
use crate::error::CaptureError;

/// Configuration for input devices
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Preferred sample rate (devices with a fixed rate ignore this)
    pub sample_rate: u32,
    /// Preferred channel count
    pub channels: u16,
    /// Duration of each delivered frame in milliseconds
    pub frame_ms: u64,
    /// Frames buffered per subscriber
    pub stream_capacity: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
            frame_ms: 20,
            stream_capacity: 1024,
        }
    }
}

impl InputConfig {
    fn samples_per_frame(&self, sample_rate: u32) -> usize {
        ((sample_rate as u64 * self.frame_ms.max(1)) / 1000).max(1) as usize
    }
}

/// Host facility that hands out live audio streams
///
/// Implementations:
/// - `MicrophoneInput`: cpal capture device (feature `microphone`)
/// - `FileInput`: replays a decoded file as if it were live
/// - `ToneInput`: synthetic sine source
#[async_trait::async_trait]
pub trait InputDevice: Send + Sync {
    /// Acquire a stream. May wait for the user to grant access.
    async fn open(&self) -> Result<MediaStream, CaptureError>;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq)]
pub enum InputSource {
    /// Capture device; `None` selects the host default
    Microphone { device: Option<String> },
    /// Audio file replayed in real time
    File(PathBuf),
    /// Sine tone generator
    Tone { frequency_hz: f32, amplitude: f32 },
}

impl std::str::FromStr for InputSource {
    type Err = String;

    /// Parses `mic`, `mic:<name>`, `file:<path>`, `tone` or `tone:<hz>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };

        match (kind, arg) {
            ("mic", None) => Ok(InputSource::Microphone { device: None }),
            ("mic", Some(name)) => Ok(InputSource::Microphone {
                device: Some(name.to_string()),
            }),
            ("file", Some(path)) if !path.is_empty() => Ok(InputSource::File(PathBuf::from(path))),
            ("tone", None) => Ok(InputSource::Tone {
                frequency_hz: 440.0,
                amplitude: 0.5,
            }),
            ("tone", Some(hz)) => hz
                .parse::<f32>()
                .map(|frequency_hz| InputSource::Tone {
                    frequency_hz,
                    amplitude: 0.5,
                })
                .map_err(|_| format!("invalid tone frequency: {}", hz)),
            _ => Err(format!(
                "unknown input '{}', expected mic[:name], file:<path> or tone[:hz]",
                s
            )),
        }
    }
}

/// Input device factory
pub struct InputFactory;

impl InputFactory {
    /// Create an input device for `source`
    pub fn create(
        source: InputSource,
        config: InputConfig,
    ) -> Result<Arc<dyn InputDevice>, CaptureError> {
        match source {
            InputSource::Microphone { device } => {
                #[cfg(feature = "microphone")]
                {
                    Ok(Arc::new(super::microphone::MicrophoneInput::new(
                        device, config,
                    )))
                }

                #[cfg(not(feature = "microphone"))]
                {
                    let _ = (device, config);
                    Err(CaptureError::DeviceUnavailable(
                        "built without the `microphone` feature".to_string(),
                    ))
                }
            }

            InputSource::File(path) => Ok(Arc::new(FileInput::new(path, config))),

            InputSource::Tone {
                frequency_hz,
                amplitude,
            } => Ok(Arc::new(ToneInput::new(frequency_hz, amplitude, config))),
        }
    }
}

/// Replays an audio file as a live stream whose tracks end with the file
pub struct FileInput {
    path: PathBuf,
    name: String,
    config: InputConfig,
    realtime: bool,
}

impl FileInput {
    pub fn new(path: impl Into<PathBuf>, config: InputConfig) -> Self {
        let path = path.into();
        Self {
            name: format!("file:{}", path.display()),
            path,
            config,
            realtime: true,
        }
    }

    /// Deliver frames as fast as consumers accept them
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }
}

#[async_trait::async_trait]
impl InputDevice for FileInput {
    async fn open(&self) -> Result<MediaStream, CaptureError> {
        let path = self.path.clone();
        let audio = tokio::task::spawn_blocking(move || DecodedAudio::open(path))
            .await
            .map_err(|e| CaptureError::DeviceUnavailable(format!("file reader failed: {}", e)))?
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

        let format = StreamFormat {
            sample_rate: audio.sample_rate,
            channels: audio.num_channels() as u16,
        };
        let (stream, feed) = MediaStream::new(format, self.config.stream_capacity);

        let frame_len = self.config.samples_per_frame(format.sample_rate);
        let pace = self.realtime.then(|| Duration::from_millis(self.config.frame_ms.max(1)));

        tokio::spawn(replay(audio, feed, frame_len, pace));

        info!("Opened {} ({}Hz, {} channels)", self.name, format.sample_rate, format.channels);
        Ok(stream)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn replay(audio: DecodedAudio, feed: TrackFeed, frame_len: usize, pace: Option<Duration>) {
    if !feed.activated().await {
        return;
    }

    let channels = audio.num_channels();
    let total = audio.frame_count();
    let mut ticker = pace.map(tokio::time::interval);
    let mut offset = 0usize;

    while offset < total {
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }

        let end = (offset + frame_len).min(total);
        let mut samples = Vec::with_capacity((end - offset) * channels);
        for i in offset..end {
            for channel in &audio.channels {
                samples.push(channel[i]);
            }
        }

        let frame = AudioFrame {
            samples,
            sample_rate: audio.sample_rate,
            channels: channels as u16,
            timestamp_ms: offset as u64 * 1000 / audio.sample_rate.max(1) as u64,
        };

        if !feed.push(frame) {
            debug!("Stream stopped during file replay");
            return;
        }

        offset = end;
        if ticker.is_none() {
            tokio::task::yield_now().await;
        }
    }

    debug!("File replay finished, ending tracks");
    feed.end();
}

/// Real-time sine tone source
pub struct ToneInput {
    frequency_hz: f32,
    amplitude: f32,
    config: InputConfig,
    name: String,
}

impl ToneInput {
    pub fn new(frequency_hz: f32, amplitude: f32, config: InputConfig) -> Self {
        Self {
            name: format!("tone:{}Hz", frequency_hz),
            frequency_hz,
            amplitude: amplitude.clamp(0.0, 1.0),
            config,
        }
    }
}

#[async_trait::async_trait]
impl InputDevice for ToneInput {
    async fn open(&self) -> Result<MediaStream, CaptureError> {
        let format = StreamFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.channels.max(1),
        };
        let (stream, feed) = MediaStream::new(format, self.config.stream_capacity);

        let frame_len = self.config.samples_per_frame(format.sample_rate);
        let period = Duration::from_millis(self.config.frame_ms.max(1));

        tokio::spawn(generate_tone(
            feed,
            self.frequency_hz,
            self.amplitude,
            frame_len,
            period,
        ));

        Ok(stream)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

async fn generate_tone(
    feed: TrackFeed,
    frequency_hz: f32,
    amplitude: f32,
    frame_len: usize,
    period: Duration,
) {
    if !feed.activated().await {
        return;
    }

    let format = feed.format();
    let channels = format.channels as usize;
    let step = 2.0 * PI * frequency_hz / format.sample_rate as f32;
    let mut phase = 0.0f32;
    let mut produced = 0u64;
    let mut ticker = tokio::time::interval(period);

    loop {
        ticker.tick().await;

        let mut samples = Vec::with_capacity(frame_len * channels);
        for _ in 0..frame_len {
            let value = amplitude * phase.sin();
            phase = (phase + step) % (2.0 * PI);
            samples.extend(std::iter::repeat(value).take(channels));
        }

        let frame = AudioFrame {
            samples,
            sample_rate: format.sample_rate,
            channels: format.channels,
            timestamp_ms: produced * 1000 / format.sample_rate as u64,
        };
        produced += frame_len as u64;

        if !feed.push(frame) {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_config_default() {
        let config = InputConfig::default();

        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.channels, 1);
        assert_eq!(config.frame_ms, 20);
        assert_eq!(config.samples_per_frame(48000), 960);
    }

    #[test]
    fn test_input_source_parsing() {
        assert_eq!(
            "mic".parse::<InputSource>().unwrap(),
            InputSource::Microphone { device: None }
        );
        assert_eq!(
            "mic:USB Audio".parse::<InputSource>().unwrap(),
            InputSource::Microphone {
                device: Some("USB Audio".to_string())
            }
        );
        assert_eq!(
            "file:/tmp/take.wav".parse::<InputSource>().unwrap(),
            InputSource::File(PathBuf::from("/tmp/take.wav"))
        );
        assert_eq!(
            "tone:1000".parse::<InputSource>().unwrap(),
            InputSource::Tone {
                frequency_hz: 1000.0,
                amplitude: 0.5
            }
        );
        assert!("speaker".parse::<InputSource>().is_err());
        assert!("file:".parse::<InputSource>().is_err());
    }

    #[cfg(not(feature = "microphone"))]
    #[test]
    fn test_microphone_requires_feature() {
        let result = InputFactory::create(
            InputSource::Microphone { device: None },
            InputConfig::default(),
        );
        assert!(matches!(result, Err(CaptureError::DeviceUnavailable(_))));
    }
}
