use serde::{Deserialize, Serialize};

use crate::audio::meter::MeterConfig;

/// Configuration for an audio session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Previously uploaded recording to offer for playback before a new take
    pub default_asset: Option<String>,

    /// Volume meter settings
    pub meter: MeterConfig,
}

impl SessionConfig {
    pub fn with_default_asset(mut self, url: impl Into<String>) -> Self {
        self.default_asset = Some(url.into());
        self
    }
}
