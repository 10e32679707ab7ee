//! Canonical 16-bit PCM WAV output.
//!
//! Layout (all integers little-endian):
//!
//! | offset | field                                  |
//! |--------|----------------------------------------|
//! | 0      | `"RIFF"`                               |
//! | 4      | `36 + data_len` (u32)                  |
//! | 8      | `"WAVE"`                               |
//! | 12     | `"fmt "`                               |
//! | 16     | `16` (u32)                             |
//! | 20     | `1` PCM (u16)                          |
//! | 22     | channels (u16)                         |
//! | 24     | sample rate (u32)                      |
//! | 28     | byte rate (u32)                        |
//! | 32     | block align (u16)                      |
//! | 34     | `16` bits per sample (u16)             |
//! | 36     | `"data"`                               |
//! | 40     | `data_len` (u32)                       |
//!
//! The payload is written channel-major: every sample of channel 0, then
//! every sample of channel 1, and so on.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, info};

use super::decoder::{ContainerDecoder, DecodedAudio};
use crate::error::CaptureError;

pub const WAV_MIME_TYPE: &str = "audio/wav";
pub const HEADER_LEN: usize = 44;

const FMT_CHUNK_LEN: u32 = 16;
const FORMAT_PCM: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;

/// Quantise one float sample to signed 16-bit
///
/// Clamps to [-1, 1], scales negatives by 32768 and the rest by 32767, and
/// rounds half toward positive infinity.
pub fn quantize_sample(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = (sample as f64).clamp(-1.0, 1.0);
    let scaled = if s < 0.0 { s * 32768.0 } else { s * 32767.0 };
    (scaled + 0.5).floor() as i16
}

/// Serialise planar PCM into a canonical WAV buffer
pub fn encode_wav(audio: &DecodedAudio) -> Result<Bytes, CaptureError> {
    let num_channels = audio.num_channels();
    if num_channels == 0 {
        return Err(CaptureError::Encode("no channels to encode".to_string()));
    }
    let num_channels = u16::try_from(num_channels)
        .map_err(|_| CaptureError::Encode(format!("too many channels: {}", num_channels)))?;

    let frame_count = audio.frame_count();
    if audio.channels.iter().any(|c| c.len() != frame_count) {
        return Err(CaptureError::Encode(
            "channel buffers have different lengths".to_string(),
        ));
    }

    let num_samples = frame_count as u64 * num_channels as u64;
    let data_len = num_samples * 2;
    if data_len > (u32::MAX - 36) as u64 {
        return Err(CaptureError::Encode(format!(
            "payload of {} bytes exceeds the WAV size limit",
            data_len
        )));
    }
    let data_len = data_len as u32;

    let header = WavHeader {
        channels: num_channels,
        sample_rate: audio.sample_rate,
        data_len,
    };

    let mut buf = BytesMut::with_capacity(HEADER_LEN + data_len as usize);
    header.write(&mut buf);

    for channel in &audio.channels {
        for &sample in channel {
            buf.put_i16_le(quantize_sample(sample));
        }
    }

    debug_assert_eq!(buf.len(), HEADER_LEN + data_len as usize);
    Ok(buf.freeze())
}

/// Fields of a canonical WAV header
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    /// Size of the `data` chunk payload in bytes
    pub data_len: u32,
}

impl WavHeader {
    pub fn riff_len(&self) -> u32 {
        self.data_len.wrapping_add(36)
    }

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate
            .wrapping_mul(self.channels as u32)
            .wrapping_mul(2)
    }

    pub fn block_align(&self) -> u16 {
        self.channels.wrapping_mul(2)
    }

    /// Samples per channel
    pub fn frame_count(&self) -> u32 {
        match self.block_align() {
            0 => 0,
            align => self.data_len / align as u32,
        }
    }

    pub fn duration(&self) -> Duration {
        match self.byte_rate() {
            0 => Duration::ZERO,
            rate => Duration::from_secs_f64(self.data_len as f64 / rate as f64),
        }
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_slice(b"RIFF");
        buf.put_u32_le(self.riff_len());
        buf.put_slice(b"WAVE");
        buf.put_slice(b"fmt ");
        buf.put_u32_le(FMT_CHUNK_LEN);
        buf.put_u16_le(FORMAT_PCM);
        buf.put_u16_le(self.channels);
        buf.put_u32_le(self.sample_rate);
        buf.put_u32_le(self.byte_rate());
        buf.put_u16_le(self.block_align());
        buf.put_u16_le(BITS_PER_SAMPLE);
        buf.put_slice(b"data");
        buf.put_u32_le(self.data_len);
    }

    /// Parse and validate a canonical header, including the payload length
    pub fn parse(bytes: &[u8]) -> Result<Self, CaptureError> {
        if bytes.len() < HEADER_LEN {
            return Err(CaptureError::Decode(format!(
                "WAV buffer too short: {} bytes",
                bytes.len()
            )));
        }

        let mut buf = &bytes[..HEADER_LEN];
        let mut tag = [0u8; 4];

        buf.copy_to_slice(&mut tag);
        expect_tag(&tag, b"RIFF")?;
        let riff_len = buf.get_u32_le();
        buf.copy_to_slice(&mut tag);
        expect_tag(&tag, b"WAVE")?;
        buf.copy_to_slice(&mut tag);
        expect_tag(&tag, b"fmt ")?;

        let fmt_len = buf.get_u32_le();
        let format = buf.get_u16_le();
        let channels = buf.get_u16_le();
        let sample_rate = buf.get_u32_le();
        let byte_rate = buf.get_u32_le();
        let block_align = buf.get_u16_le();
        let bits = buf.get_u16_le();

        buf.copy_to_slice(&mut tag);
        expect_tag(&tag, b"data")?;
        let data_len = buf.get_u32_le();

        if fmt_len != FMT_CHUNK_LEN || format != FORMAT_PCM || bits != BITS_PER_SAMPLE {
            return Err(CaptureError::Decode(
                "not a canonical 16-bit PCM WAV".to_string(),
            ));
        }

        let header = WavHeader {
            channels,
            sample_rate,
            data_len,
        };

        if riff_len != header.riff_len()
            || byte_rate != header.byte_rate()
            || block_align != header.block_align()
        {
            return Err(CaptureError::Decode("inconsistent WAV header".to_string()));
        }

        if bytes.len() - HEADER_LEN != data_len as usize {
            return Err(CaptureError::Decode(format!(
                "WAV declares {} data bytes but carries {}",
                data_len,
                bytes.len() - HEADER_LEN
            )));
        }

        Ok(header)
    }
}

/// Read a buffer produced by `encode_wav` back into planar PCM
///
/// Only canonical headers are accepted, and the payload is read
/// channel-major. General-purpose WAV readers assume interleaved frames and
/// would scramble multi-channel recordings.
pub fn decode_canonical(bytes: &[u8]) -> Result<DecodedAudio, CaptureError> {
    let header = WavHeader::parse(bytes)?;
    if header.channels == 0 || header.sample_rate == 0 {
        return Err(CaptureError::Decode(
            "WAV declares no channels or no sample rate".to_string(),
        ));
    }

    let frames = header.frame_count() as usize;
    let mut payload = &bytes[HEADER_LEN..];
    let mut channels = Vec::with_capacity(header.channels as usize);

    for _ in 0..header.channels {
        let mut samples = Vec::with_capacity(frames);
        for _ in 0..frames {
            samples.push(dequantize_sample(payload.get_i16_le()));
        }
        channels.push(samples);
    }

    Ok(DecodedAudio {
        sample_rate: header.sample_rate,
        channels,
    })
}

/// Inverse of `quantize_sample`
fn dequantize_sample(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32768.0
    } else {
        sample as f32 / 32767.0
    }
}

fn expect_tag(tag: &[u8; 4], expected: &[u8; 4]) -> Result<(), CaptureError> {
    if tag == expected {
        Ok(())
    } else {
        Err(CaptureError::Decode(format!(
            "expected {:?} tag, found {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(tag)
        )))
    }
}

/// Converts a recorded container into canonical WAV bytes
#[derive(Clone)]
pub struct WavEncoder {
    decoder: Arc<dyn ContainerDecoder>,
}

impl WavEncoder {
    pub fn new(decoder: Arc<dyn ContainerDecoder>) -> Self {
        Self { decoder }
    }

    /// Decode `container` and serialise it. Nothing is written unless
    /// decoding succeeds.
    pub async fn transcode(
        &self,
        container: Bytes,
        mime_type: Option<String>,
    ) -> Result<(DecodedAudio, Bytes), CaptureError> {
        debug!("Decoding {} byte container", container.len());

        let decoder = Arc::clone(&self.decoder);
        let decoded = tokio::task::spawn_blocking(move || {
            decoder.decode(&container, mime_type.as_deref())
        })
        .await
        .map_err(|e| CaptureError::Decode(format!("decoder task failed: {}", e)))??;

        let wav = encode_wav(&decoded)?;

        info!(
            "Encoded WAV: {}Hz, {} channels, {} frames, {} bytes",
            decoded.sample_rate,
            decoded.num_channels(),
            decoded.frame_count(),
            wav.len()
        );

        Ok((decoded, wav))
    }
}
