//! Speaker output through cpal.
//!
//! Like capture, each output stream lives on its own thread. The thread
//! stops the stream when the buffer runs out or when the `render` future
//! that started it is dropped.

#[cfg(feature = "microphone")]
pub use device::CpalBackend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audio::decoder::DecodedAudio;

/// Walks a decoded buffer at the device rate
///
/// Resampling picks the nearest earlier source frame. Device channels past
/// the source's last channel repeat it.
#[cfg_attr(not(feature = "microphone"), allow(dead_code))]
struct FrameCursor {
    audio: DecodedAudio,
    position: f64,
    step: f64,
    device_channels: usize,
    finished: Arc<AtomicBool>,
}

#[cfg_attr(not(feature = "microphone"), allow(dead_code))]
impl FrameCursor {
    fn new(
        audio: DecodedAudio,
        start_frame: usize,
        device_rate: u32,
        device_channels: u16,
        finished: Arc<AtomicBool>,
    ) -> Self {
        let step = audio.sample_rate as f64 / device_rate.max(1) as f64;
        Self {
            audio,
            position: start_frame as f64,
            step,
            device_channels: device_channels.max(1) as usize,
            finished,
        }
    }

    /// Fill one interleaved device buffer, padding with silence at the end
    fn fill<T: Copy>(&mut self, out: &mut [T], convert: impl Fn(f32) -> T) {
        let frames = self.audio.frame_count();
        let last_channel = self.audio.num_channels().saturating_sub(1);

        for frame in out.chunks_mut(self.device_channels) {
            let index = self.position as usize;
            if index >= frames {
                frame.iter_mut().for_each(|s| *s = convert(0.0));
                self.finished.store(true, Ordering::Release);
                continue;
            }
            for (c, sample) in frame.iter_mut().enumerate() {
                *sample = convert(self.audio.channels[c.min(last_channel)][index]);
            }
            self.position += self.step;
        }
    }
}

#[cfg(feature = "microphone")]
mod device {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleFormat;
    use tokio::sync::oneshot;
    use tracing::{debug, error, info};

    use super::FrameCursor;
    use crate::audio::decoder::DecodedAudio;
    use crate::audio::wav::quantize_sample;
    use crate::error::CaptureError;
    use crate::playback::{load_source, PlaybackBackend};
    use crate::session::ObjectUrlRegistry;

    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    /// Plays sources on a host output device
    pub struct CpalBackend {
        registry: ObjectUrlRegistry,
        device_name: Option<String>,
    }

    impl CpalBackend {
        pub fn new(registry: ObjectUrlRegistry) -> Self {
            Self {
                registry,
                device_name: None,
            }
        }

        /// Use a named output device instead of the host default
        pub fn with_device(mut self, device_name: impl Into<String>) -> Self {
            self.device_name = Some(device_name.into());
            self
        }
    }

    /// Tells the output thread to stop when `render` is dropped
    struct StopOnDrop(Arc<AtomicBool>);

    impl Drop for StopOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::Release);
        }
    }

    #[async_trait::async_trait]
    impl PlaybackBackend for CpalBackend {
        async fn render(&self, url: &str, offset: Duration) -> Result<(), CaptureError> {
            let audio = load_source(&self.registry, url).await?;

            let start_frame = (offset.as_secs_f64() * audio.sample_rate as f64) as usize;
            if start_frame >= audio.frame_count() {
                debug!("Offset {:?} is past the end of {}", offset, url);
                return Ok(());
            }

            let stop = Arc::new(AtomicBool::new(false));
            let _stop_on_drop = StopOnDrop(Arc::clone(&stop));
            let (done_tx, done_rx) = oneshot::channel();
            let device_name = self.device_name.clone();

            thread::Builder::new()
                .name("speech-capture-out".to_string())
                .spawn(move || run_output_thread(device_name, audio, start_frame, stop, done_tx))
                .map_err(|e| CaptureError::Playback(format!("output thread: {}", e)))?;

            done_rx
                .await
                .map_err(|_| CaptureError::Playback("output thread exited".to_string()))?
        }
    }

    fn run_output_thread(
        device_name: Option<String>,
        audio: DecodedAudio,
        start_frame: usize,
        stop: Arc<AtomicBool>,
        done: oneshot::Sender<Result<(), CaptureError>>,
    ) {
        let finished = Arc::new(AtomicBool::new(false));
        let stream = match build_stream(device_name, audio, start_frame, Arc::clone(&finished)) {
            Ok(stream) => stream,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };

        while !finished.load(Ordering::Acquire) && !stop.load(Ordering::Acquire) {
            thread::sleep(POLL_INTERVAL);
        }

        drop(stream);
        if stop.load(Ordering::Acquire) {
            debug!("Output stream stopped early");
        } else {
            debug!("Output stream drained");
        }
        let _ = done.send(Ok(()));
    }

    fn build_stream(
        device_name: Option<String>,
        audio: DecodedAudio,
        start_frame: usize,
        finished: Arc<AtomicBool>,
    ) -> Result<cpal::Stream, CaptureError> {
        let host = cpal::default_host();

        let device = match device_name.as_deref() {
            None | Some("default") => host.default_output_device(),
            Some(wanted) => host
                .output_devices()
                .map_err(|e| CaptureError::Playback(e.to_string()))?
                .find(|d| d.name().map(|n| n == wanted).unwrap_or(false)),
        }
        .ok_or_else(|| {
            CaptureError::Playback(match &device_name {
                Some(name) => format!("output device '{}' not found", name),
                None => "no default output device".to_string(),
            })
        })?;

        let supported = device
            .default_output_config()
            .map_err(|e| CaptureError::Playback(e.to_string()))?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();

        info!(
            "Playback device: {} ({}Hz, {} channels, {:?}) for {}Hz source",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate.0,
            config.channels,
            sample_format,
            audio.sample_rate
        );

        let mut cursor = FrameCursor::new(
            audio,
            start_frame,
            config.sample_rate.0,
            config.channels,
            finished,
        );
        let on_error = |err: cpal::StreamError| error!("Output stream error: {}", err);

        let stream = match sample_format {
            SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    cursor.fill(data, |s| s);
                },
                on_error,
                None,
            ),
            SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    cursor.fill(data, quantize_sample);
                },
                on_error,
                None,
            ),
            other => {
                return Err(CaptureError::Playback(format!(
                    "unsupported output sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| CaptureError::Playback(e.to_string()))?;

        stream
            .play()
            .map_err(|e| CaptureError::Playback(e.to_string()))?;

        Ok(stream)
    }
}
