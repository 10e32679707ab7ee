use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use symphonia::core::audio::{AudioBuffer, Signal};
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::error::CaptureError;

/// Decoded PCM, one buffer per channel
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Planar samples, `channels[c][frame]`
    pub channels: Vec<Vec<f32>>,
}

impl DecodedAudio {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel
    pub fn frame_count(&self) -> usize {
        self.channels.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / self.sample_rate as f64)
    }

    /// Decode an audio file from disk
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let bytes = std::fs::read(path).map_err(|e| {
            CaptureError::Decode(format!("failed to read {}: {}", path.display(), e))
        })?;

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let audio = decode_with_hint(bytes, hint)?;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} frames",
            audio.duration().as_secs_f64(),
            audio.sample_rate,
            audio.num_channels(),
            audio.frame_count()
        );

        Ok(audio)
    }
}

/// Turns a recorded container into PCM
///
/// Decoding is CPU-bound; callers run it on a blocking thread.
pub trait ContainerDecoder: Send + Sync + 'static {
    fn decode(&self, container: &[u8], mime_type: Option<&str>) -> Result<DecodedAudio, CaptureError>;
}

/// Decoder backed by symphonia's format probe and codec registry
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl ContainerDecoder for SymphoniaDecoder {
    fn decode(&self, container: &[u8], mime_type: Option<&str>) -> Result<DecodedAudio, CaptureError> {
        let mut hint = Hint::new();
        if let Some(mime) = mime_type {
            hint.mime_type(mime);
        }
        decode_with_hint(container.to_vec(), hint)
    }
}

fn decode_with_hint(bytes: Vec<u8>, hint: Hint) -> Result<DecodedAudio, CaptureError> {
    if bytes.is_empty() {
        return Err(CaptureError::Decode("container is empty".to_string()));
    }

    let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| CaptureError::Decode(format!("unrecognised container: {}", e)))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| CaptureError::Decode("no audio track in container".to_string()))?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channel_count = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| CaptureError::Decode(format!("unsupported codec: {}", e)))?;

    let mut channels: Vec<Vec<f32>> = vec![Vec::new(); channel_count];
    let mut buffer: Option<AudioBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => {
                debug!("Decoder reset requested, treating as end of stream");
                break;
            }
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let spec = *decoded.spec();
        if channels.len() != spec.channels.count() {
            if channels.iter().any(|c| !c.is_empty()) {
                return Err(CaptureError::Decode(
                    "channel layout changed mid-stream".to_string(),
                ));
            }
            channel_count = spec.channels.count();
            channels = vec![Vec::new(); channel_count];
        }
        sample_rate = spec.rate;

        let needs_alloc = buffer
            .as_ref()
            .map(|b| b.capacity() < decoded.capacity() || *b.spec() != spec)
            .unwrap_or(true);
        if needs_alloc {
            buffer = Some(AudioBuffer::new(decoded.capacity() as u64, spec));
        }

        if let Some(buf) = buffer.as_mut() {
            decoded.convert(buf);
            for (ch, samples) in channels.iter_mut().enumerate() {
                samples.extend_from_slice(buf.chan(ch));
            }
        }
    }

    if channel_count == 0 {
        return Err(CaptureError::Decode("container declares no channels".to_string()));
    }
    if sample_rate == 0 {
        return Err(CaptureError::Decode("container declares no sample rate".to_string()));
    }

    Ok(DecodedAudio {
        sample_rate,
        channels,
    })
}
