use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::asset::{ObjectUrlRegistry, RecordedAsset};
use super::config::SessionConfig;
use super::state::{SessionSnapshot, SessionState};
use crate::audio::{
    ContainerDecoder, ContainerFormat, InputDevice, Recorder, SymphoniaDecoder, VolumeMeter,
    WavContainer, WavEncoder, WAV_MIME_TYPE,
};
use crate::error::CaptureError;
use crate::playback::{host_backend, PlaybackBackend, PlaybackController};

/// One recording widget: capture, metering, WAV conversion and playback
///
/// Each session owns its stream, meter loop and object URLs; sessions never
/// share capture state.
pub struct AudioSession {
    id: Uuid,
    config: SessionConfig,
    device: Arc<dyn InputDevice>,
    recorder: Recorder,
    meter: VolumeMeter,
    encoder: WavEncoder,
    playback: PlaybackController,
    registry: ObjectUrlRegistry,
    state: Arc<watch::Sender<SessionState>>,
    result: Option<RecordedAsset>,
    last_error: Option<CaptureError>,
}

impl AudioSession {
    /// Create a session in `Idle`, offering `config.default_asset` for playback
    pub fn new(config: SessionConfig, device: Arc<dyn InputDevice>) -> Self {
        let registry = ObjectUrlRegistry::new();
        let backend = host_backend(registry.clone());
        let (state, _) = watch::channel(SessionState::Idle);
        let id = Uuid::new_v4();

        info!(
            "Creating audio session {} on {}{}",
            id,
            device.name(),
            config
                .default_asset
                .as_deref()
                .map(|url| format!(" (default asset {})", url))
                .unwrap_or_default()
        );

        Self {
            id,
            recorder: Recorder::new(Arc::new(WavContainer)),
            meter: VolumeMeter::new(config.meter.clone()),
            encoder: WavEncoder::new(Arc::new(SymphoniaDecoder)),
            playback: PlaybackController::new(backend, config.default_asset.clone()),
            registry,
            device,
            config,
            state: Arc::new(state),
            result: None,
            last_error: None,
        }
    }

    /// Use a different decoding facility
    pub fn with_decoder(mut self, decoder: Arc<dyn ContainerDecoder>) -> Self {
        self.encoder = WavEncoder::new(decoder);
        self
    }

    /// Use a different recorder container
    pub fn with_container(mut self, container: Arc<dyn ContainerFormat>) -> Self {
        self.recorder = Recorder::new(container);
        self
    }

    /// Use a different audio output
    pub fn with_playback_backend(mut self, backend: Arc<dyn PlaybackBackend>) -> Self {
        self.playback = PlaybackController::new(backend, self.config.default_asset.clone());
        self
    }

    /// Register playable URLs in a shared registry
    ///
    /// Call before `with_playback_backend` when the backend resolves URLs.
    pub fn with_registry(mut self, registry: ObjectUrlRegistry) -> Self {
        self.registry = registry.clone();
        self.playback = PlaybackController::new(
            host_backend(registry),
            self.config.default_asset.clone(),
        );
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn volume(&self) -> f32 {
        self.meter.volume()
    }

    pub fn subscribe_volume(&self) -> watch::Receiver<f32> {
        self.meter.subscribe()
    }

    pub fn is_recording(&self) -> bool {
        self.state().is_recording()
    }

    pub fn is_playing(&self) -> bool {
        self.playback.is_playing()
    }

    pub fn subscribe_playing(&self) -> watch::Receiver<bool> {
        self.playback.subscribe()
    }

    /// Latest successfully completed recording
    pub fn result(&self) -> Option<&RecordedAsset> {
        self.result.as_ref()
    }

    pub fn last_error(&self) -> Option<&CaptureError> {
        self.last_error.as_ref()
    }

    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    pub fn playback_source(&self) -> Option<String> {
        self.playback.source()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            volume: self.volume(),
            is_recording: self.is_recording(),
            is_playing: self.is_playing(),
            playable_url: self.playback.source(),
            duration: self.result.as_ref().map(|a| a.duration),
        }
    }

    /// Request the input stream and start recording
    ///
    /// Ignored unless the session is `Idle`, `Ready` or `Error`. A denied or
    /// missing device leaves the session in `Error` and is returned to the
    /// caller, who may retry.
    pub async fn start(&mut self) -> Result<(), CaptureError> {
        let current = self.state();
        if !current.can_start() {
            debug!("Ignoring start in {:?}", current);
            return Ok(());
        }

        self.set_state(SessionState::Requesting);
        let guard = TransitionGuard::new(self.id, Arc::clone(&self.state), current);

        let outcome = self.recorder.start(self.device.as_ref()).await;
        guard.disarm();

        match outcome {
            Ok(tap) => {
                self.last_error = None;
                self.meter.start(tap);
                self.set_state(SessionState::Recording);
                Ok(())
            }
            Err(e) => {
                warn!("Session {} could not start recording: {}", self.id, e);
                Err(self.fail(e))
            }
        }
    }

    /// Stop recording and convert the take to WAV
    ///
    /// Ignored unless the session is `Recording`. Resolves once the session
    /// has settled in `Ready`, `Idle` (empty take, nothing recorded before) or
    /// `Error`. Dropping the future while encoding abandons the take and
    /// settles in `Ready` or `Idle`.
    pub async fn stop(&mut self) -> Result<(), CaptureError> {
        if !self.is_recording() {
            debug!("Ignoring stop in {:?}", self.state());
            return Ok(());
        }

        self.meter.stop().await;
        self.meter.reset();

        let Some(pending) = self.recorder.stop() else {
            return Ok(());
        };
        self.set_state(SessionState::Encoding);
        let guard = TransitionGuard::new(self.id, Arc::clone(&self.state), self.rest_state());

        let chunks = match pending.finish().await {
            Ok(chunks) => chunks,
            Err(e) => {
                guard.disarm();
                error!("Session {} lost its recording: {}", self.id, e);
                return Err(self.fail(e));
            }
        };

        if chunks.is_empty() {
            guard.disarm();
            info!("Session {} stopped with no audio, keeping previous result", self.id);
            self.set_state(self.rest_state());
            return Ok(());
        }

        let mime_type = chunks.mime_type().to_string();
        let transcoded = self
            .encoder
            .transcode(chunks.into_blob(), Some(mime_type))
            .await;
        guard.disarm();

        let (decoded, wav_bytes) = match transcoded {
            Ok(output) => output,
            Err(e) => {
                error!("Session {} failed to encode its recording: {}", self.id, e);
                return Err(self.fail(e));
            }
        };

        let playable_url = self.registry.create(wav_bytes.clone(), WAV_MIME_TYPE);
        let asset = RecordedAsset {
            wav_bytes,
            playable_url: playable_url.clone(),
            mime_type: WAV_MIME_TYPE.to_string(),
            sample_rate: decoded.sample_rate,
            channels: decoded.num_channels() as u16,
            duration: decoded.duration(),
            created_at: Utc::now(),
        };

        if let Some(previous) = self.result.replace(asset) {
            self.registry.revoke(&previous.playable_url);
        }
        self.playback.set_source(Some(playable_url));

        info!(
            "Session {} ready: {:.2}s recording",
            self.id,
            decoded.duration().as_secs_f64()
        );
        self.set_state(SessionState::Ready);
        Ok(())
    }

    pub fn play(&mut self) {
        self.playback.play();
    }

    pub fn pause(&mut self) {
        self.playback.pause();
    }

    /// Tear the session down: discard any in-flight recording without
    /// flushing, stop metering and playback, and release object URLs.
    pub async fn close(mut self) {
        self.meter.stop().await;
        self.teardown();
        info!("Session {} closed", self.id);
    }

    fn teardown(&mut self) {
        self.recorder.discard();
        self.meter.reset();
        self.playback.set_source(None);
        if let Some(asset) = self.result.take() {
            self.registry.revoke(&asset.playable_url);
        }
        if self.state().is_recording() {
            self.set_state(SessionState::Idle);
        }
    }

    /// Where the session settles when a take yields nothing
    fn rest_state(&self) -> SessionState {
        if self.result.is_some() {
            SessionState::Ready
        } else {
            SessionState::Idle
        }
    }

    fn fail(&mut self, e: CaptureError) -> CaptureError {
        self.meter.reset();
        self.set_state(SessionState::Error(e.kind()));
        self.last_error = Some(e.clone());
        e
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session {}: {:?} -> {:?}", self.id, previous, next);
        }
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Restores a rest state if a `start` or `stop` future is dropped before it
/// settles
struct TransitionGuard {
    session: Uuid,
    state: Arc<watch::Sender<SessionState>>,
    fallback: SessionState,
    armed: bool,
}

impl TransitionGuard {
    fn new(session: Uuid, state: Arc<watch::Sender<SessionState>>, fallback: SessionState) -> Self {
        Self {
            session,
            state,
            fallback,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for TransitionGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let interrupted = self.state.send_replace(self.fallback);
        warn!(
            "Session {} abandoned {:?}, back to {:?}",
            self.session, interrupted, self.fallback
        );
    }
}
