// Shared test inputs and decoders
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use speech_capture::audio::{
    AudioFrame, ContainerDecoder, DecodedAudio, InputDevice, MediaStream, StreamFormat,
    SymphoniaDecoder, TrackFeed,
};
use speech_capture::CaptureError;

/// Input whose frames are pushed by the test
pub struct ManualInput {
    format: StreamFormat,
    capacity: usize,
    feed: Mutex<Option<TrackFeed>>,
    opened: AtomicUsize,
}

impl ManualInput {
    pub fn new(format: StreamFormat) -> Arc<Self> {
        Self::with_capacity(format, 1024)
    }

    pub fn with_capacity(format: StreamFormat, capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            format,
            capacity,
            feed: Mutex::new(None),
            opened: AtomicUsize::new(0),
        })
    }

    pub fn mono() -> Arc<Self> {
        Self::new(StreamFormat {
            sample_rate: 48000,
            channels: 1,
        })
    }

    /// Push `frames` frames of `len` samples each at `value`
    pub fn push(&self, value: f32, len: usize, frames: usize) -> bool {
        let feed = self.feed.lock().unwrap().clone();
        let Some(feed) = feed else {
            return false;
        };
        (0..frames).all(|i| {
            feed.push(AudioFrame {
                samples: vec![value; len],
                sample_rate: self.format.sample_rate,
                channels: self.format.channels,
                timestamp_ms: i as u64 * 20,
            })
        })
    }

    pub fn push_frame(&self, frame: AudioFrame) -> bool {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .map(|feed| feed.push(frame))
            .unwrap_or(false)
    }

    pub fn is_ended(&self) -> bool {
        self.feed
            .lock()
            .unwrap()
            .as_ref()
            .map(|feed| feed.is_ended())
            .unwrap_or(true)
    }

    pub fn times_opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InputDevice for ManualInput {
    async fn open(&self) -> Result<MediaStream, CaptureError> {
        let (stream, feed) = MediaStream::new(self.format, self.capacity);
        *self.feed.lock().unwrap() = Some(feed);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(stream)
    }

    fn name(&self) -> &str {
        "manual"
    }
}

/// Input that refuses access until `grant` is called
pub struct DeniedInput {
    granted: AtomicBool,
    inner: Arc<ManualInput>,
}

impl DeniedInput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            granted: AtomicBool::new(false),
            inner: ManualInput::mono(),
        })
    }

    pub fn grant(&self) {
        self.granted.store(true, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &ManualInput {
        &self.inner
    }
}

#[async_trait]
impl InputDevice for DeniedInput {
    async fn open(&self) -> Result<MediaStream, CaptureError> {
        if !self.granted.load(Ordering::SeqCst) {
            return Err(CaptureError::PermissionDenied(
                "user dismissed the prompt".to_string(),
            ));
        }
        self.inner.open().await
    }

    fn name(&self) -> &str {
        "denied"
    }
}

/// Input whose `open` never completes until `release` is called, like a
/// permission prompt left on screen
pub struct StallingInput {
    stalled: AtomicBool,
    inner: Arc<ManualInput>,
}

impl StallingInput {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            stalled: AtomicBool::new(true),
            inner: ManualInput::mono(),
        })
    }

    pub fn release(&self) {
        self.stalled.store(false, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &ManualInput {
        &self.inner
    }
}

#[async_trait]
impl InputDevice for StallingInput {
    async fn open(&self) -> Result<MediaStream, CaptureError> {
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.open().await
    }

    fn name(&self) -> &str {
        "stalling"
    }
}

/// Symphonia decoder that counts calls and can be told to fail or stall
#[derive(Default)]
pub struct CountingDecoder {
    calls: AtomicUsize,
    fail: AtomicBool,
    delay_ms: AtomicU64,
}

impl CountingDecoder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl ContainerDecoder for CountingDecoder {
    fn decode(&self, bytes: &[u8], mime_type: Option<&str>) -> Result<DecodedAudio, CaptureError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            // Runs on a blocking thread
            std::thread::sleep(Duration::from_millis(delay));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(CaptureError::Decode("corrupt container".to_string()));
        }
        SymphoniaDecoder.decode(bytes, mime_type)
    }
}

/// Build a 32-bit float WAV container with hound
pub fn float_wav(sample_rate: u32, channels: u16, interleaved: &[f32]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &sample in interleaved {
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

pub fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

pub fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

pub fn read_i16(bytes: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([bytes[at], bytes[at + 1]])
}
