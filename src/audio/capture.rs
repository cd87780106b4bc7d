//! Audio capture from microphone

use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleRate;
use tokio::sync::mpsc;

use crate::audio::{AudioFrame, SourceEvent};
use crate::config::EngineConfig;
use crate::{Error, Result};

/// Frames the capture stream may fall behind the wall clock before a gap is
/// reported
const GAP_SLACK_FRAMES: u64 = 5;

/// A continuous frame producer.
///
/// `open` acquires the capture device exclusively for the session lifetime
/// and returns the frame stream; `close` releases it and is idempotent.
pub trait AudioSource {
    /// Start capturing and return the event stream
    ///
    /// # Errors
    ///
    /// Returns `DeviceUnavailable` or `PermissionDenied` if capture cannot
    /// start
    fn open(&mut self, config: &EngineConfig) -> Result<mpsc::UnboundedReceiver<SourceEvent>>;

    /// Stop capturing and release the device; idempotent
    fn close(&mut self);
}

/// Captures audio from the default input device
pub struct CpalSource {
    stream: Option<cpal::Stream>,
}

impl CpalSource {
    /// Create an unopened capture source
    #[must_use]
    pub const fn new() -> Self {
        Self { stream: None }
    }
}

impl Default for CpalSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for CpalSource {
    fn open(&mut self, config: &EngineConfig) -> Result<mpsc::UnboundedReceiver<SourceEvent>> {
        if self.stream.is_some() {
            return Err(Error::Session("capture already open".to_string()));
        }

        let rate = config.sample_rate;
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| map_backend_message(&e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(rate)
                    && c.max_sample_rate() >= SampleRate(rate)
            })
            .ok_or_else(|| {
                Error::DeviceUnavailable(format!("no mono input config at {rate} Hz"))
            })?;

        let stream_config = supported.with_sample_rate(SampleRate(rate)).config();

        let (tx, rx) = mpsc::unbounded_channel();
        let mut assembler = FrameAssembler::new(config.samples_per_frame(), rate, tx.clone());
        let fault_tx = tx;

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    assembler.push(data, Instant::now());
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    let _ = fault_tx.send(SourceEvent::Failed(map_stream_error(&err)));
                },
                None,
            )
            .map_err(map_build_error)?;

        stream
            .play()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = rate,
            frame_samples = config.samples_per_frame(),
            "audio capture started"
        );

        Ok(rx)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("audio capture stopped");
        }
    }
}

/// Chunks the device callback's sample bursts into fixed-duration frames.
///
/// Timestamps come from the sample clock, so they are strictly monotonic.
/// Device overruns show up as the sample clock falling behind the wall
/// clock; a deficit beyond the slack is reported once as a gap and the
/// baseline resynced.
struct FrameAssembler {
    frame_len: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    seq: u64,
    samples_emitted: u64,
    samples_received: u64,
    opened_at: Option<Instant>,
    tx: mpsc::UnboundedSender<SourceEvent>,
}

impl FrameAssembler {
    fn new(frame_len: usize, sample_rate: u32, tx: mpsc::UnboundedSender<SourceEvent>) -> Self {
        Self {
            frame_len,
            sample_rate,
            pending: Vec::with_capacity(frame_len * 2),
            seq: 0,
            samples_emitted: 0,
            samples_received: 0,
            opened_at: None,
            tx,
        }
    }

    fn push(&mut self, data: &[f32], now: Instant) {
        let opened = *self.opened_at.get_or_insert(now);
        self.samples_received += data.len() as u64;

        #[allow(clippy::cast_possible_truncation)]
        let expected = now.duration_since(opened).as_millis() as u64
            * u64::from(self.sample_rate)
            / 1000;
        let slack = GAP_SLACK_FRAMES * self.frame_len as u64;
        if expected > self.samples_received + slack {
            let missed_frames = (expected - self.samples_received) / self.frame_len as u64;
            tracing::warn!(missed_frames, "capture gap detected");
            let _ = self.tx.send(SourceEvent::Gap { missed_frames });
            self.samples_received = expected;
        }

        self.pending.extend_from_slice(data);
        while self.pending.len() >= self.frame_len {
            let samples: Vec<f32> = self.pending.drain(..self.frame_len).collect();
            let timestamp_ms = self.samples_emitted * 1000 / u64::from(self.sample_rate);
            self.samples_emitted += self.frame_len as u64;
            let frame = AudioFrame {
                samples,
                timestamp_ms,
                seq: self.seq,
            };
            self.seq += 1;
            if self.tx.send(SourceEvent::Frame(frame)).is_err() {
                // receiver gone, session is shutting down
                return;
            }
        }
    }
}

fn map_build_error(e: cpal::BuildStreamError) -> Error {
    match e {
        cpal::BuildStreamError::DeviceNotAvailable => {
            Error::DeviceUnavailable("input device disappeared".to_string())
        }
        cpal::BuildStreamError::StreamConfigNotSupported
        | cpal::BuildStreamError::InvalidArgument => Error::DeviceUnavailable(e.to_string()),
        other => map_backend_message(&other.to_string()),
    }
}

fn map_stream_error(e: &cpal::StreamError) -> Error {
    match e {
        cpal::StreamError::DeviceNotAvailable => {
            Error::DeviceUnavailable("input device disappeared".to_string())
        }
        cpal::StreamError::BackendSpecific { .. } => map_backend_message(&e.to_string()),
    }
}

/// Backends report permission failures as free-form messages
fn map_backend_message(message: &str) -> Error {
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not permitted")
    {
        Error::PermissionDenied(message.to_string())
    } else {
        Error::Audio(message.to_string())
    }
}
