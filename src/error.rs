use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the capture pipeline
///
/// Every variant is recoverable at the session level: the caller retries by
/// starting a new recording.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// The host refused access to the input device
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    /// No usable input device exists
    #[error("no audio input device available: {0}")]
    DeviceUnavailable(String),

    /// The recorded container could not be decoded into PCM
    #[error("failed to decode recorded audio: {0}")]
    Decode(String),

    /// The recorder or WAV writer could not produce a container
    #[error("failed to encode audio: {0}")]
    Encode(String),

    /// A playback source could not be resolved or rendered
    #[error("playback failed: {0}")]
    Playback(String),
}

impl CaptureError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CaptureError::PermissionDenied(_) => FailureKind::PermissionDenied,
            CaptureError::DeviceUnavailable(_) => FailureKind::DeviceUnavailable,
            CaptureError::Decode(_) => FailureKind::Decode,
            CaptureError::Encode(_) => FailureKind::Encode,
            CaptureError::Playback(_) => FailureKind::Playback,
        }
    }
}

/// Error category carried by `SessionState::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    PermissionDenied,
    DeviceUnavailable,
    Decode,
    Encode,
    Playback,
}

impl From<hound::Error> for CaptureError {
    fn from(e: hound::Error) -> Self {
        CaptureError::Encode(e.to_string())
    }
}

impl From<symphonia::core::errors::Error> for CaptureError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        CaptureError::Decode(e.to_string())
    }
}
