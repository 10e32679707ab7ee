//! Resolving playback URLs to PCM.
//!
//! Accepted forms: object URLs from the session registry, `file://` URLs or
//! plain paths, and `http(s)://` URLs.

use std::path::PathBuf;

use bytes::Bytes;
use tracing::{debug, info};

use crate::audio::decoder::{ContainerDecoder, DecodedAudio, SymphoniaDecoder};
use crate::audio::wav::decode_canonical;
use crate::error::CaptureError;
use crate::session::ObjectUrlRegistry;

pub fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Fetch and decode the audio behind `url`
pub async fn load_source(
    registry: &ObjectUrlRegistry,
    url: &str,
) -> Result<DecodedAudio, CaptureError> {
    if ObjectUrlRegistry::is_object_url(url) {
        let bytes = registry
            .resolve(url)
            .ok_or_else(|| CaptureError::Playback(format!("{} has been revoked", url)))?;
        return decode_blocking(bytes, registry.mime_type(url)).await;
    }

    if is_remote(url) {
        let (bytes, mime) = fetch(url).await?;
        return decode_blocking(bytes, mime).await;
    }

    let path = PathBuf::from(url.strip_prefix("file://").unwrap_or(url));
    tokio::task::spawn_blocking(move || {
        let bytes = std::fs::read(&path).map_err(|e| {
            CaptureError::Playback(format!("failed to read {}: {}", path.display(), e))
        })?;
        match decode_canonical(&bytes) {
            Ok(audio) => Ok(audio),
            // The extension is the best hint symphonia gets for local files
            Err(_) => DecodedAudio::open(&path),
        }
    })
    .await
    .map_err(|e| CaptureError::Playback(format!("decoder task failed: {}", e)))?
    .map_err(into_playback)
}

async fn fetch(url: &str) -> Result<(Bytes, Option<String>), CaptureError> {
    info!("Fetching remote audio: {}", url);

    let response = reqwest::get(url)
        .await
        .map_err(|e| CaptureError::Playback(format!("request to {} failed: {}", url, e)))?
        .error_for_status()
        .map_err(|e| CaptureError::Playback(e.to_string()))?;

    let mime = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string());

    let bytes = response
        .bytes()
        .await
        .map_err(|e| CaptureError::Playback(format!("failed to read {}: {}", url, e)))?;

    debug!("Fetched {} bytes ({:?}) from {}", bytes.len(), mime, url);
    Ok((bytes, mime))
}

async fn decode_blocking(bytes: Bytes, mime: Option<String>) -> Result<DecodedAudio, CaptureError> {
    tokio::task::spawn_blocking(move || match decode_canonical(&bytes) {
        Ok(audio) => Ok(audio),
        Err(_) => SymphoniaDecoder.decode(&bytes, mime.as_deref()),
    })
    .await
    .map_err(|e| CaptureError::Playback(format!("decoder task failed: {}", e)))?
    .map_err(into_playback)
}

fn into_playback(e: CaptureError) -> CaptureError {
    match e {
        CaptureError::Playback(_) => e,
        other => CaptureError::Playback(other.to_string()),
    }
}
