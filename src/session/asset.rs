use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

const URL_PREFIX: &str = "blob:speech-capture/";

#[derive(Debug, Clone)]
struct ObjectEntry {
    bytes: Bytes,
    mime_type: String,
}

/// In-process object URLs for recorded buffers
///
/// Cloning shares the same registry.
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlRegistry {
    entries: Arc<Mutex<HashMap<String, ObjectEntry>>>,
}

impl ObjectUrlRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_object_url(url: &str) -> bool {
        url.starts_with(URL_PREFIX)
    }

    /// Register `bytes` and return a URL that resolves to them
    pub fn create(&self, bytes: Bytes, mime_type: &str) -> String {
        let url = format!("{}{}", URL_PREFIX, Uuid::new_v4());
        let entry = ObjectEntry {
            bytes,
            mime_type: mime_type.to_string(),
        };
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(url.clone(), entry);
        }
        debug!("Created object URL {}", url);
        url
    }

    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        let entries = self.entries.lock().ok()?;
        entries.get(url).map(|e| e.bytes.clone())
    }

    pub fn mime_type(&self, url: &str) -> Option<String> {
        let entries = self.entries.lock().ok()?;
        entries.get(url).map(|e| e.mime_type.clone())
    }

    /// Invalidate `url`. Returns whether it was registered.
    pub fn revoke(&self, url: &str) -> bool {
        let removed = self
            .entries
            .lock()
            .map(|mut entries| entries.remove(url).is_some())
            .unwrap_or(false);
        if removed {
            debug!("Revoked object URL {}", url);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A completed recording, ready for upload and playback
#[derive(Debug, Clone, Serialize)]
pub struct RecordedAsset {
    /// Canonical WAV bytes
    #[serde(skip)]
    pub wav_bytes: Bytes,
    /// Object URL resolving to `wav_bytes`
    pub playable_url: String,
    pub mime_type: String,
    pub sample_rate: u32,
    pub channels: u16,
    pub duration: Duration,
    pub created_at: DateTime<Utc>,
}
