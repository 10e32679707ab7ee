//! Live loudness estimate for UI feedback.
//!
//! The analyser follows the Web Audio `AnalyserNode` byte-frequency pipeline:
//! Blackman window over the newest 256 samples, FFT, magnitude scaled by
//! 1/N, exponential smoothing (0.8), conversion to dB, then mapping
//! [-100 dB, -30 dB] onto [0, 255]. The published volume is the mean of the
//! 128 resulting bins.

use std::collections::VecDeque;
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::stream::AudioFrame;

pub const FFT_SIZE: usize = 256;
pub const FREQUENCY_BIN_COUNT: usize = FFT_SIZE / 2;

const SMOOTHING_TIME_CONSTANT: f32 = 0.8;
const MIN_DECIBELS: f32 = -100.0;
const MAX_DECIBELS: f32 = -30.0;

/// Meter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Period between volume updates (one animation frame by default)
    pub interval_ms: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self { interval_ms: 16 }
    }
}

/// Frequency-domain analyser over a sliding window of mono samples
pub struct FrequencyAnalyser {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    history: VecDeque<f32>,
    smoothed: Vec<f32>,
    scratch: Vec<Complex<f32>>,
}

impl FrequencyAnalyser {
    pub fn new() -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(FFT_SIZE);

        Self {
            fft,
            window: blackman_window(FFT_SIZE),
            history: VecDeque::from(vec![0.0; FFT_SIZE]),
            smoothed: vec![0.0; FREQUENCY_BIN_COUNT],
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
        }
    }

    /// Append interleaved samples, down-mixed to mono by averaging channels
    pub fn push_interleaved(&mut self, samples: &[f32], channels: u16) {
        let channels = channels.max(1) as usize;
        for frame in samples.chunks_exact(channels) {
            let mono = frame.iter().sum::<f32>() / channels as f32;
            if self.history.len() == FFT_SIZE {
                self.history.pop_front();
            }
            self.history.push_back(mono);
        }
    }

    /// Byte-scaled frequency data for the current window
    pub fn byte_frequency_data(&mut self) -> [u8; FREQUENCY_BIN_COUNT] {
        for (i, (slot, sample)) in self.scratch.iter_mut().zip(self.history.iter()).enumerate() {
            *slot = Complex::new(sample * self.window[i], 0.0);
        }

        self.fft.process(&mut self.scratch);

        let mut bytes = [0u8; FREQUENCY_BIN_COUNT];
        let range = MAX_DECIBELS - MIN_DECIBELS;

        for (k, byte) in bytes.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() / FFT_SIZE as f32;
            let smoothed = SMOOTHING_TIME_CONSTANT * self.smoothed[k]
                + (1.0 - SMOOTHING_TIME_CONSTANT) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let db = 20.0 * self.smoothed[k].log10();
            let scaled = (255.0 / range) * (db - MIN_DECIBELS);
            *byte = if scaled.is_finite() {
                scaled.floor().clamp(0.0, 255.0) as u8
            } else {
                0
            };
        }

        bytes
    }

    /// Arithmetic mean over every frequency bin
    pub fn volume(&mut self) -> f32 {
        let bins = self.byte_frequency_data();
        bins.iter().map(|&b| b as f32).sum::<f32>() / FREQUENCY_BIN_COUNT as f32
    }
}

impl Default for FrequencyAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

fn blackman_window(size: usize) -> Vec<f32> {
    let (a0, a1, a2) = (0.42f32, 0.5f32, 0.08f32);
    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

/// Publishes a loudness estimate while a stream is live
///
/// The meter only holds a broadcast tap, never the stream itself: once the
/// stream's tracks stop, the loop ends on its own.
pub struct VolumeMeter {
    config: MeterConfig,
    volume: Arc<watch::Sender<f32>>,
    task: Option<JoinHandle<()>>,
}

impl VolumeMeter {
    pub fn new(config: MeterConfig) -> Self {
        let (volume, _) = watch::channel(0.0);
        Self {
            config,
            volume: Arc::new(volume),
            task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<f32> {
        self.volume.subscribe()
    }

    pub fn volume(&self) -> f32 {
        *self.volume.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// Begin metering frames from `tap`, replacing any previous loop
    pub fn start(&mut self, tap: broadcast::Receiver<AudioFrame>) {
        self.abort();

        let volume = Arc::clone(&self.volume);
        let interval = Duration::from_millis(self.config.interval_ms.max(1));

        debug!("Volume meter started ({}ms interval)", interval.as_millis());
        self.task = Some(tokio::spawn(run_meter(tap, volume, interval)));
    }

    /// Cancel the loop and wait until it can no longer publish. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
            debug!("Volume meter stopped");
        }
    }

    /// Publish the neutral value
    pub fn reset(&self) {
        self.volume.send_replace(0.0);
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for VolumeMeter {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn run_meter(
    mut tap: broadcast::Receiver<AudioFrame>,
    volume: Arc<watch::Sender<f32>>,
    period: Duration,
) {
    let mut analyser = FrequencyAnalyser::new();
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = tap.recv() => match received {
                Ok(frame) => analyser.push_interleaved(&frame.samples, frame.channels),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    trace!("Volume meter skipped {} frames", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Stream ended, volume meter exiting");
                    break;
                }
            },
            _ = ticker.tick() => {
                volume.send_replace(analyser.volume());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| amplitude * (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn test_silence_reads_zero() {
        let mut analyser = FrequencyAnalyser::new();
        analyser.push_interleaved(&[0.0; 512], 1);
        assert_eq!(analyser.volume(), 0.0);
    }

    #[test]
    fn test_loud_tone_reads_above_quiet_tone() {
        let mut loud = FrequencyAnalyser::new();
        let mut quiet = FrequencyAnalyser::new();
        loud.push_interleaved(&sine(1000.0, 48000.0, 0.8, 1024), 1);
        quiet.push_interleaved(&sine(1000.0, 48000.0, 0.001, 1024), 1);

        // Let the smoothing settle
        let (mut l, mut q) = (0.0, 0.0);
        for _ in 0..30 {
            l = loud.volume();
            q = quiet.volume();
        }

        assert!(l > 0.0);
        assert!(l > q, "loud {} should exceed quiet {}", l, q);
        assert!(l <= 255.0);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let mut analyser = FrequencyAnalyser::new();
        // Opposite-phase channels cancel out
        let samples: Vec<f32> = (0..512).flat_map(|_| [0.5f32, -0.5f32]).collect();
        analyser.push_interleaved(&samples, 2);
        assert_eq!(analyser.volume(), 0.0);
    }

    #[test]
    fn test_byte_data_has_one_value_per_bin() {
        let mut analyser = FrequencyAnalyser::new();
        analyser.push_interleaved(&sine(440.0, 8000.0, 0.5, 256), 1);
        assert_eq!(analyser.byte_frequency_data().len(), 128);
    }

    #[test]
    fn test_meter_config_default() {
        assert_eq!(MeterConfig::default().interval_ms, 16);
    }
}
