pub mod audio;
pub mod config;
pub mod error;
pub mod logging;
pub mod playback;
pub mod session;

pub use audio::{
    AudioFrame, ContainerDecoder, ContainerFormat, DecodedAudio, InputConfig, InputDevice,
    InputFactory, InputSource, MediaStream, Recorder, StreamFormat, SymphoniaDecoder,
    VolumeMeter, WavEncoder, WavHeader,
};
pub use config::Config;
pub use error::{CaptureError, FailureKind};
pub use playback::{host_backend, ClockBackend, PlaybackBackend, PlaybackController};

#[cfg(feature = "microphone")]
pub use playback::CpalBackend;
pub use session::{AudioSession, ObjectUrlRegistry, RecordedAsset, SessionConfig, SessionState};
