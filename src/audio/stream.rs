//! Live audio stream shared between a device, the recorder and the meter.
//!
//! A `MediaStream` exclusively owns the broadcast sender. Devices push frames
//! through a `TrackFeed`; consumers subscribe and receive non-owning taps that
//! observe end-of-stream as soon as the tracks are stopped.

use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, watch};
use tracing::debug;
use uuid::Uuid;

/// Sample layout of a live stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self {
            sample_rate: 48000,
            channels: 1,
        }
    }
}

/// Audio sample data (f32, interleaved, nominal range [-1, 1])
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw samples (interleaved)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream went live
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }
}

/// Lifecycle of the stream's tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Opened but no consumer attached yet; frames are dropped
    Pending,
    /// Frames are delivered to subscribers
    Live,
    /// Tracks stopped; no further frames
    Ended,
}

struct StreamShared {
    id: Uuid,
    format: StreamFormat,
    sender: Mutex<Option<broadcast::Sender<AudioFrame>>>,
    state: watch::Sender<TrackState>,
}

/// An acquired input stream
pub struct MediaStream {
    shared: Arc<StreamShared>,
}

impl MediaStream {
    /// Create a stream and the producer handle that feeds it
    pub fn new(format: StreamFormat, capacity: usize) -> (Self, TrackFeed) {
        let (sender, _) = broadcast::channel(capacity.max(1));
        let (state, _) = watch::channel(TrackState::Pending);

        let shared = Arc::new(StreamShared {
            id: Uuid::new_v4(),
            format,
            sender: Mutex::new(Some(sender)),
            state,
        });

        let feed = TrackFeed {
            shared: Arc::clone(&shared),
        };

        (Self { shared }, feed)
    }

    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    pub fn track_state(&self) -> TrackState {
        *self.shared.state.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.track_state() == TrackState::Live
    }

    /// Attach a consumer. Returns `None` once the tracks have ended.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<AudioFrame>> {
        let sender = self.shared.sender.lock().ok()?;
        sender.as_ref().map(|s| s.subscribe())
    }

    /// Start delivering frames to subscribers
    pub fn activate(&self) {
        self.shared.state.send_if_modified(|state| {
            if *state == TrackState::Pending {
                *state = TrackState::Live;
                true
            } else {
                false
            }
        });
    }

    /// Stop every track. Subscribers drain buffered frames, then see the end
    /// of the stream. Idempotent.
    pub fn stop_tracks(&self) {
        self.shared.end();
    }
}

impl StreamShared {
    fn end(&self) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if sender.is_some() {
            debug!("Stopping tracks of stream {}", self.id);
        }
        drop(sender);

        self.state.send_replace(TrackState::Ended);
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.stop_tracks();
    }
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.shared.id)
            .field("format", &self.shared.format)
            .field("state", &self.track_state())
            .finish()
    }
}

/// Producer side of a `MediaStream`, held by the device
#[derive(Clone)]
pub struct TrackFeed {
    shared: Arc<StreamShared>,
}

impl TrackFeed {
    pub fn format(&self) -> StreamFormat {
        self.shared.format
    }

    /// Deliver a frame. Frames pushed before activation are dropped.
    ///
    /// Returns `false` once the tracks have ended.
    pub fn push(&self, frame: AudioFrame) -> bool {
        match *self.shared.state.borrow() {
            TrackState::Pending => return true,
            TrackState::Ended => return false,
            TrackState::Live => {}
        }

        let guard = match self.shared.sender.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };

        match guard.as_ref() {
            Some(sender) => {
                // No receivers is not an error: the stream is still live
                let _ = sender.send(frame);
                true
            }
            None => false,
        }
    }

    pub fn is_ended(&self) -> bool {
        *self.shared.state.borrow() == TrackState::Ended
    }

    /// Wait until the stream leaves `Pending`. Returns whether it is live.
    pub async fn activated(&self) -> bool {
        let mut rx = self.shared.state.subscribe();
        let live = match rx.wait_for(|state| *state != TrackState::Pending).await {
            Ok(state) => *state == TrackState::Live,
            Err(_) => false,
        };
        live
    }

    /// End the tracks from the producer side, e.g. when a source runs dry.
    /// Consumers drain what is buffered and then see the end of the stream.
    pub fn end(&self) {
        self.shared.end();
    }

    /// Wait until the tracks are stopped
    pub async fn ended(&self) {
        let mut rx = self.shared.state.subscribe();
        let _ = rx.wait_for(|state| *state == TrackState::Ended).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(value: f32) -> AudioFrame {
        AudioFrame {
            samples: vec![value; 4],
            sample_rate: 8000,
            channels: 1,
            timestamp_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_frames_before_activation_are_dropped() {
        let (stream, feed) = MediaStream::new(StreamFormat::default(), 8);
        let mut rx = stream.subscribe().unwrap();

        assert!(feed.push(frame(0.1)));
        stream.activate();
        assert!(feed.push(frame(0.2)));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.samples[0], 0.2);
    }

    #[tokio::test]
    async fn test_stop_tracks_closes_subscribers_after_draining() {
        let (stream, feed) = MediaStream::new(StreamFormat::default(), 8);
        let mut rx = stream.subscribe().unwrap();
        stream.activate();

        feed.push(frame(0.5));
        stream.stop_tracks();

        assert!(rx.recv().await.is_ok());
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(!feed.push(frame(0.5)));
        assert!(feed.is_ended());
        assert!(stream.subscribe().is_none());
    }

    #[tokio::test]
    async fn test_producer_end_closes_subscribers() {
        let (stream, feed) = MediaStream::new(StreamFormat::default(), 8);
        let mut rx = stream.subscribe().unwrap();
        stream.activate();
        assert!(feed.activated().await);

        feed.push(frame(0.3));
        feed.end();

        assert_eq!(rx.recv().await.unwrap().samples[0], 0.3);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert_eq!(stream.track_state(), TrackState::Ended);
        assert!(!feed.push(frame(0.3)));

        // Stopping afterwards is still harmless
        stream.stop_tracks();
    }

    #[tokio::test]
    async fn test_dropping_stream_ends_tracks() {
        let (stream, feed) = MediaStream::new(StreamFormat::default(), 8);
        stream.activate();
        assert!(feed.activated().await);

        drop(stream);
        feed.ended().await;
        assert!(feed.is_ended());
    }
}
