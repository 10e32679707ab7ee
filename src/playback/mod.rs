//! Play/pause control over one recorded or remote asset.

mod output;
mod source;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::CaptureError;
use crate::session::ObjectUrlRegistry;

pub use source::{is_remote, load_source};

#[cfg(feature = "microphone")]
pub use output::CpalBackend;

/// Host audio output
///
/// `render` resolves when playback reaches the end of the source. Dropping
/// the future stops output.
#[async_trait::async_trait]
pub trait PlaybackBackend: Send + Sync + 'static {
    async fn render(&self, url: &str, offset: Duration) -> Result<(), CaptureError>;
}

/// Backend that elapses the source's duration without producing sound
///
/// Sources are still resolved and decoded, so a missing or undecodable URL
/// fails the same way it would on a real output.
pub struct ClockBackend {
    registry: ObjectUrlRegistry,
}

impl ClockBackend {
    pub fn new(registry: ObjectUrlRegistry) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl PlaybackBackend for ClockBackend {
    async fn render(&self, url: &str, offset: Duration) -> Result<(), CaptureError> {
        let duration = load_source(&self.registry, url).await?.duration();
        tokio::time::sleep(duration.saturating_sub(offset)).await;
        Ok(())
    }
}

/// Output used by sessions: the host speakers when built with the
/// `microphone` feature, a silent clock otherwise
pub fn host_backend(registry: ObjectUrlRegistry) -> Arc<dyn PlaybackBackend> {
    #[cfg(feature = "microphone")]
    {
        Arc::new(CpalBackend::new(registry))
    }
    #[cfg(not(feature = "microphone"))]
    {
        Arc::new(ClockBackend::new(registry))
    }
}

#[derive(Debug, Default)]
struct Cursor {
    source: Option<String>,
    position: Duration,
    started_at: Option<Instant>,
    generation: u64,
}

impl Cursor {
    fn current_position(&self) -> Duration {
        match self.started_at {
            Some(started) => self.position + started.elapsed(),
            None => self.position,
        }
    }
}

/// Single play/pause cursor
pub struct PlaybackController {
    backend: Arc<dyn PlaybackBackend>,
    cursor: Arc<Mutex<Cursor>>,
    playing: Arc<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl PlaybackController {
    pub fn new(backend: Arc<dyn PlaybackBackend>, source: Option<String>) -> Self {
        let (playing, _) = watch::channel(false);
        Self {
            backend,
            cursor: Arc::new(Mutex::new(Cursor {
                source,
                ..Default::default()
            })),
            playing: Arc::new(playing),
            task: None,
        }
    }

    pub fn source(&self) -> Option<String> {
        self.cursor.lock().ok().and_then(|c| c.source.clone())
    }

    pub fn is_playing(&self) -> bool {
        *self.playing.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.playing.subscribe()
    }

    pub fn position(&self) -> Duration {
        self.cursor
            .lock()
            .map(|c| c.current_position())
            .unwrap_or_default()
    }

    /// Start playing from the current position. No-op without a source or
    /// while already playing.
    pub fn play(&mut self) {
        let (url, offset, generation) = {
            let Ok(mut cursor) = self.cursor.lock() else {
                return;
            };
            if cursor.started_at.is_some() {
                return;
            }
            let Some(url) = cursor.source.clone() else {
                debug!("Play requested without a source");
                return;
            };
            cursor.generation += 1;
            cursor.started_at = Some(Instant::now());
            (url, cursor.position, cursor.generation)
        };

        self.playing.send_replace(true);
        info!("Playback started: {} at {:.2}s", url, offset.as_secs_f64());

        let backend = Arc::clone(&self.backend);
        let cursor = Arc::clone(&self.cursor);
        let playing = Arc::clone(&self.playing);

        self.task = Some(tokio::spawn(async move {
            if let Err(e) = backend.render(&url, offset).await {
                warn!("Playback of {} failed: {}", url, e);
            }

            let Ok(mut cursor) = cursor.lock() else {
                return;
            };
            if cursor.generation != generation {
                return;
            }
            cursor.started_at = None;
            cursor.position = Duration::ZERO;
            playing.send_replace(false);
            debug!("Playback reached the end of {}", url);
        }));
    }

    /// Pause, keeping the position. No-op when not playing.
    pub fn pause(&mut self) {
        {
            let Ok(mut cursor) = self.cursor.lock() else {
                return;
            };
            let Some(started) = cursor.started_at.take() else {
                return;
            };
            cursor.position += started.elapsed();
            cursor.generation += 1;
        }
        self.abort_task();
        self.playing.send_replace(false);
        debug!("Playback paused at {:.2}s", self.position().as_secs_f64());
    }

    /// Replace the source, stopping any playback and rewinding
    pub fn set_source(&mut self, source: Option<String>) {
        if let Ok(mut cursor) = self.cursor.lock() {
            cursor.source = source;
            cursor.position = Duration::ZERO;
            cursor.started_at = None;
            cursor.generation += 1;
        }
        self.abort_task();
        self.playing.send_replace(false);
    }

    /// Stop playback and rewind, keeping the source
    pub fn stop(&mut self) {
        let source = self.source();
        self.set_source(source);
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.abort_task();
    }
}
