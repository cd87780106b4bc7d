//! Configuration for the Parlance engine

pub mod file;

pub use file::{FileConfig, config_file_path};

use crate::{Error, Result};

/// Engine configuration, immutable for the lifetime of a session.
///
/// Changing any value requires stopping the session and starting a new one.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Capture sample rate in Hz (mono)
    pub sample_rate: u32,

    /// Duration of one capture frame in milliseconds
    pub frame_duration_ms: u32,

    /// Normalized RMS energy threshold in [0, 1]; a frame at or above it is voiced
    pub energy_threshold: f64,

    /// Sustained silence that closes an utterance, in milliseconds
    pub silence_threshold_ms: u32,

    /// Minimum voiced duration for an utterance to be recognized, in milliseconds
    pub min_utterance_ms: u32,

    /// Continuous voiced duration that triggers barge-in during playback
    pub barge_in_debounce_ms: u32,

    /// Timeout for one remote recognition call, in milliseconds
    pub recognition_timeout_ms: u64,

    /// Timeout for one remote synthesis call, in milliseconds
    pub synthesis_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_duration_ms: 30,
            energy_threshold: 0.015,
            silence_threshold_ms: 700,
            min_utterance_ms: 200,
            barge_in_debounce_ms: 150,
            recognition_timeout_ms: 10_000,
            synthesis_timeout_ms: 10_000,
        }
    }
}

impl EngineConfig {
    /// Validate all values before any resource is acquired
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for any out-of-range value
    pub fn validate(&self) -> Result<()> {
        if !(8_000..=48_000).contains(&self.sample_rate) {
            return Err(Error::Config(format!(
                "sample_rate {} outside 8000..=48000",
                self.sample_rate
            )));
        }
        if !(10..=100).contains(&self.frame_duration_ms) {
            return Err(Error::Config(format!(
                "frame_duration_ms {} outside 10..=100",
                self.frame_duration_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.energy_threshold) {
            return Err(Error::Config(format!(
                "energy_threshold {} outside 0.0..=1.0",
                self.energy_threshold
            )));
        }
        if self.silence_threshold_ms == 0 {
            return Err(Error::Config("silence_threshold_ms must be > 0".into()));
        }
        if self.min_utterance_ms == 0 {
            return Err(Error::Config("min_utterance_ms must be > 0".into()));
        }
        if self.barge_in_debounce_ms == 0 {
            return Err(Error::Config("barge_in_debounce_ms must be > 0".into()));
        }
        if self.barge_in_debounce_ms > self.min_utterance_ms {
            return Err(Error::Config(format!(
                "barge_in_debounce_ms {} exceeds min_utterance_ms {}",
                self.barge_in_debounce_ms, self.min_utterance_ms
            )));
        }
        if self.recognition_timeout_ms == 0 || self.synthesis_timeout_ms == 0 {
            return Err(Error::Config("timeouts must be > 0".into()));
        }
        Ok(())
    }

    /// Number of samples in one capture frame
    #[must_use]
    pub const fn samples_per_frame(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }
}
