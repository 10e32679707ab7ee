use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

/// Lifecycle of an `AudioSession`
///
/// ```text
/// Idle ──start──▶ Requesting ──granted──▶ Recording ──stop──▶ Encoding ──ok──▶ Ready
///                     │                                          │
///                     └──denied──▶ Error ◀──────decode failure───┘
/// ```
///
/// `Ready` and `Error` are rest states; `start` leaves either of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Requesting,
    Recording,
    Encoding,
    Ready,
    Error(FailureKind),
}

impl Default for SessionState {
    fn default() -> Self {
        SessionState::Idle
    }
}

impl SessionState {
    /// Whether `start` may begin a new recording from this state
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Ready | SessionState::Error(_)
        )
    }

    pub fn is_recording(&self) -> bool {
        matches!(self, SessionState::Recording)
    }
}

/// Point-in-time view of a session for UI bindings
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub volume: f32,
    pub is_recording: bool,
    pub is_playing: bool,
    /// URL currently offered for playback (recorded or default asset)
    pub playable_url: Option<String>,
    /// Duration of the latest completed recording
    pub duration: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_allowed_only_from_rest_states() {
        assert!(SessionState::Idle.can_start());
        assert!(SessionState::Ready.can_start());
        assert!(SessionState::Error(FailureKind::PermissionDenied).can_start());
        assert!(!SessionState::Requesting.can_start());
        assert!(!SessionState::Recording.can_start());
        assert!(!SessionState::Encoding.can_start());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&SessionState::Error(FailureKind::Decode)).unwrap();
        assert_eq!(json, r#"{"state":"error","reason":"decode"}"#);

        let json = serde_json::to_string(&SessionState::Recording).unwrap();
        assert_eq!(json, r#"{"state":"recording"}"#);
    }
}
