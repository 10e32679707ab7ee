//! Microphone capture through cpal.
//!
//! cpal streams are not `Send` on every host, so each stream lives on its own
//! thread until the tracks of the `MediaStream` it feeds are stopped.

use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, PlayStreamError, SampleFormat};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::backend::{InputConfig, InputDevice};
use super::stream::{AudioFrame, MediaStream, StreamFormat, TrackFeed};
use crate::error::CaptureError;

const TRACK_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Capture device provided by the host audio system
pub struct MicrophoneInput {
    device_name: Option<String>,
    config: InputConfig,
    name: String,
}

impl MicrophoneInput {
    pub fn new(device_name: Option<String>, config: InputConfig) -> Self {
        let name = match &device_name {
            Some(device) => format!("mic:{}", device),
            None => "mic:default".to_string(),
        };
        Self {
            device_name,
            config,
            name,
        }
    }
}

#[async_trait::async_trait]
impl InputDevice for MicrophoneInput {
    async fn open(&self) -> Result<MediaStream, CaptureError> {
        let (tx, rx) = oneshot::channel();
        let device_name = self.device_name.clone();
        let capacity = self.config.stream_capacity;

        thread::Builder::new()
            .name("speech-capture-mic".to_string())
            .spawn(move || run_capture_thread(device_name, capacity, tx))
            .map_err(|e| CaptureError::DeviceUnavailable(format!("capture thread: {}", e)))?;

        rx.await
            .map_err(|_| CaptureError::DeviceUnavailable("capture thread exited".to_string()))?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

fn run_capture_thread(
    device_name: Option<String>,
    capacity: usize,
    reply: oneshot::Sender<Result<MediaStream, CaptureError>>,
) {
    let (stream, feed, cpal_stream) = match build_stream(device_name, capacity) {
        Ok(parts) => parts,
        Err(e) => {
            let _ = reply.send(Err(e));
            return;
        }
    };

    if reply.send(Ok(stream)).is_err() {
        debug!("Caller went away before the microphone stream was handed over");
        return;
    }

    while !feed.is_ended() {
        thread::sleep(TRACK_POLL_INTERVAL);
    }

    drop(cpal_stream);
    info!("Microphone stream released");
}

fn build_stream(
    device_name: Option<String>,
    capacity: usize,
) -> Result<(MediaStream, TrackFeed, cpal::Stream), CaptureError> {
    let host = cpal::default_host();

    let device = match device_name.as_deref() {
        None | Some("default") => host.default_input_device(),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
    }
    .ok_or_else(|| {
        CaptureError::DeviceUnavailable(match &device_name {
            Some(name) => format!("input device '{}' not found", name),
            None => "no default input device".to_string(),
        })
    })?;

    let supported = device
        .default_input_config()
        .map_err(|e| CaptureError::DeviceUnavailable(e.to_string()))?;

    let format = StreamFormat {
        sample_rate: supported.sample_rate().0,
        channels: supported.channels(),
    };
    let sample_format = supported.sample_format();

    info!(
        "Recording device: {} ({}Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        format.sample_rate,
        format.channels,
        sample_format
    );

    let (stream, feed) = MediaStream::new(format, capacity);
    let config: cpal::StreamConfig = supported.into();
    let on_error = |err: cpal::StreamError| error!("Audio stream error: {}", err);

    let cpal_stream = match sample_format {
        SampleFormat::F32 => {
            let feed = feed.clone();
            let mut clock = FrameClock::new(format);
            device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    feed.push(clock.frame(data.to_vec()));
                },
                on_error,
                None,
            )
        }
        SampleFormat::I16 => {
            let feed = feed.clone();
            let mut clock = FrameClock::new(format);
            device.build_input_stream(
                &config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    feed.push(clock.frame(samples));
                },
                on_error,
                None,
            )
        }
        SampleFormat::U16 => {
            let feed = feed.clone();
            let mut clock = FrameClock::new(format);
            device.build_input_stream(
                &config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    let samples = data
                        .iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect();
                    feed.push(clock.frame(samples));
                },
                on_error,
                None,
            )
        }
        other => {
            return Err(CaptureError::DeviceUnavailable(format!(
                "unsupported sample format {:?}",
                other
            )))
        }
    }
    .map_err(map_build_error)?;

    cpal_stream.play().map_err(map_play_error)?;

    Ok((stream, feed, cpal_stream))
}

fn map_build_error(e: BuildStreamError) -> CaptureError {
    match e {
        BuildStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("input device disappeared".to_string())
        }
        other => {
            warn!("Host refused input stream: {}", other);
            CaptureError::PermissionDenied(other.to_string())
        }
    }
}

fn map_play_error(e: PlayStreamError) -> CaptureError {
    match e {
        PlayStreamError::DeviceNotAvailable => {
            CaptureError::DeviceUnavailable("input device disappeared".to_string())
        }
        other => CaptureError::PermissionDenied(other.to_string()),
    }
}

/// Stamps callback buffers with their offset from the start of capture
struct FrameClock {
    format: StreamFormat,
    frames: u64,
}

impl FrameClock {
    fn new(format: StreamFormat) -> Self {
        Self { format, frames: 0 }
    }

    fn frame(&mut self, samples: Vec<f32>) -> AudioFrame {
        let timestamp_ms = self.frames * 1000 / self.format.sample_rate.max(1) as u64;
        self.frames += (samples.len() / self.format.channels.max(1) as usize) as u64;
        AudioFrame {
            samples,
            sample_rate: self.format.sample_rate,
            channels: self.format.channels,
            timestamp_ms,
        }
    }
}
