use std::io::Cursor;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::backend::InputDevice;
use super::stream::{AudioFrame, MediaStream, StreamFormat};
use crate::error::CaptureError;

/// Container produced by the recorder before WAV conversion
pub trait ContainerFormat: Send + Sync + 'static {
    fn mime_type(&self) -> &str;

    fn encoder(&self, format: StreamFormat) -> Box<dyn ContainerEncoder>;
}

/// Incremental container writer driven by the recording task
pub trait ContainerEncoder: Send + 'static {
    /// Consume a frame; may emit a chunk
    fn push(&mut self, frame: &AudioFrame) -> Result<Option<Bytes>, CaptureError>;

    /// Emit everything still buffered. May be empty.
    fn flush(&mut self) -> Result<Bytes, CaptureError>;
}

/// 32-bit float WAV container, emitted as a single chunk on flush
#[derive(Debug, Default, Clone, Copy)]
pub struct WavContainer;

impl ContainerFormat for WavContainer {
    fn mime_type(&self) -> &str {
        "audio/wav"
    }

    fn encoder(&self, format: StreamFormat) -> Box<dyn ContainerEncoder> {
        Box::new(WavContainerEncoder::new(format))
    }
}

pub struct WavContainerEncoder {
    spec: hound::WavSpec,
    samples: Vec<f32>,
}

impl WavContainerEncoder {
    pub fn new(format: StreamFormat) -> Self {
        Self {
            spec: hound::WavSpec {
                channels: format.channels,
                sample_rate: format.sample_rate,
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            },
            samples: Vec::new(),
        }
    }
}

impl ContainerEncoder for WavContainerEncoder {
    fn push(&mut self, frame: &AudioFrame) -> Result<Option<Bytes>, CaptureError> {
        if frame.channels != self.spec.channels || frame.sample_rate != self.spec.sample_rate {
            return Err(CaptureError::Encode(format!(
                "frame format {}Hz/{}ch does not match stream {}Hz/{}ch",
                frame.sample_rate, frame.channels, self.spec.sample_rate, self.spec.channels
            )));
        }
        self.samples.extend_from_slice(&frame.samples);
        Ok(None)
    }

    fn flush(&mut self) -> Result<Bytes, CaptureError> {
        if self.samples.is_empty() {
            return Ok(Bytes::new());
        }

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.spec)?;
            for &sample in &self.samples {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }

        self.samples.clear();
        Ok(Bytes::from(cursor.into_inner()))
    }
}

/// Ordered chunks of one recording
#[derive(Debug, Clone, Default)]
pub struct RecordedChunks {
    mime_type: String,
    chunks: Vec<Bytes>,
}

impl RecordedChunks {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            chunks: Vec::new(),
        }
    }

    /// Append in arrival order; zero-size chunks are dropped
    pub fn append(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            trace!("Discarding empty chunk");
            return;
        }
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn total_bytes(&self) -> usize {
        self.chunks.iter().map(|c| c.len()).sum()
    }

    /// Concatenate every chunk into one container blob
    pub fn into_blob(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut blob = BytesMut::with_capacity(self.total_bytes());
        for chunk in &self.chunks {
            blob.extend_from_slice(chunk);
        }
        blob.freeze()
    }
}

struct ActiveRecording {
    stream: MediaStream,
    task: JoinHandle<Result<RecordedChunks, CaptureError>>,
}

/// Owns the record/stop lifecycle and the live stream while recording
pub struct Recorder {
    container: Arc<dyn ContainerFormat>,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(container: Arc<dyn ContainerFormat>) -> Self {
        Self {
            container,
            active: None,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    /// Acquire a stream from `device` and start recording it
    ///
    /// Returns a tap on the same stream for metering.
    pub async fn start(
        &mut self,
        device: &dyn InputDevice,
    ) -> Result<broadcast::Receiver<AudioFrame>, CaptureError> {
        let stream = device.open().await?;
        let format = stream.format();

        let (frames, tap) = match (stream.subscribe(), stream.subscribe()) {
            (Some(frames), Some(tap)) => (frames, tap),
            _ => {
                return Err(CaptureError::DeviceUnavailable(format!(
                    "{} ended its stream before recording started",
                    device.name()
                )))
            }
        };

        let encoder = self.container.encoder(format);
        let mime_type = self.container.mime_type().to_string();
        let task = tokio::spawn(record(frames, encoder, mime_type));

        stream.activate();

        info!(
            "Recording started on {} ({}Hz, {} channels)",
            device.name(),
            format.sample_rate,
            format.channels
        );

        self.active = Some(ActiveRecording { stream, task });
        Ok(tap)
    }

    /// Stop the tracks and let the recording task flush
    ///
    /// Returns `None` when nothing is recording.
    pub fn stop(&mut self) -> Option<PendingFlush> {
        let active = self.active.take()?;
        active.stream.stop_tracks();
        debug!("Recorder stopped, waiting for flush");
        Some(PendingFlush { task: active.task })
    }

    /// Abandon the recording without flushing
    pub fn discard(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
            active.stream.stop_tracks();
            info!("Recording discarded");
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Completion handle for a stopped recording
pub struct PendingFlush {
    task: JoinHandle<Result<RecordedChunks, CaptureError>>,
}

impl PendingFlush {
    pub async fn finish(self) -> Result<RecordedChunks, CaptureError> {
        self.task
            .await
            .map_err(|e| CaptureError::Encode(format!("recording task failed: {}", e)))?
    }
}

async fn record(
    mut frames: broadcast::Receiver<AudioFrame>,
    mut encoder: Box<dyn ContainerEncoder>,
    mime_type: String,
) -> Result<RecordedChunks, CaptureError> {
    let mut chunks = RecordedChunks::new(mime_type);
    let mut frame_count = 0usize;

    loop {
        match frames.recv().await {
            Ok(frame) => {
                frame_count += frame.frame_count();
                if let Some(chunk) = encoder.push(&frame)? {
                    chunks.append(chunk);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Recorder fell behind, {} frames lost", skipped);
                return Err(CaptureError::Encode(format!(
                    "recording is missing {} frames after the recorder fell behind",
                    skipped
                )));
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    chunks.append(encoder.flush()?);

    info!(
        "Recording flushed: {} sample frames, {} chunks, {} bytes",
        frame_count,
        chunks.len(),
        chunks.total_bytes()
    );

    Ok(chunks)
}
