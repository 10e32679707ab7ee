pub mod backend;
pub mod decoder;
pub mod meter;
pub mod recorder;
pub mod stream;
pub mod wav;

#[cfg(feature = "microphone")]
pub mod microphone;

pub use backend::{FileInput, InputConfig, InputDevice, InputFactory, InputSource, ToneInput};
pub use decoder::{ContainerDecoder, DecodedAudio, SymphoniaDecoder};
pub use meter::{FrequencyAnalyser, MeterConfig, VolumeMeter};
pub use recorder::{
    ContainerEncoder, ContainerFormat, PendingFlush, RecordedChunks, Recorder, WavContainer,
};
pub use stream::{AudioFrame, MediaStream, StreamFormat, TrackFeed, TrackState};
pub use wav::{
    decode_canonical, encode_wav, quantize_sample, WavEncoder, WavHeader, WAV_MIME_TYPE,
};

#[cfg(feature = "microphone")]
pub use microphone::MicrophoneInput;
