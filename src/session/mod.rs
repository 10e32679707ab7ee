//! Audio session management
//!
//! This module provides the `AudioSession` abstraction that manages:
//! - Input stream acquisition and release
//! - Live volume metering while recording
//! - Container flush and canonical WAV conversion
//! - Object URLs and playback of the latest take
//! - The session state machine

mod asset;
mod config;
mod session;
mod state;

pub use asset::{ObjectUrlRegistry, RecordedAsset};
pub use config::SessionConfig;
pub use session::AudioSession;
pub use state::{SessionSnapshot, SessionState};
