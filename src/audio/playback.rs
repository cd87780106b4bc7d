//! Audio playback to speakers

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio::sync::oneshot;

use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// How often the playback thread polls for stop/completion
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// An interruptible audio output.
///
/// `start` returns immediately; the sink must halt promptly once `stop` is
/// set and must resolve `done` exactly once when output ends — `true` for a
/// natural finish, `false` when stopped early.
pub trait AudioSink: Send + Sync {
    /// Output sample rate the sink expects samples at
    fn sample_rate(&self) -> u32;

    /// Begin playing `samples`; returns once output is underway
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if the output device cannot start
    fn start(
        &self,
        samples: Vec<f32>,
        stop: Arc<AtomicBool>,
        done: oneshot::Sender<bool>,
    ) -> Result<()>;
}

/// Plays audio to the default output device
pub struct CpalSink {
    config: StreamConfig,
}

impl CpalSink {
    /// Create a new sink, probing the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no suitable output device or config exists
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;

        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Playback(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // fallback: stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| {
                Error::DeviceUnavailable("no suitable output config found".to_string())
            })?;

        let config = supported
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { config })
    }
}

impl AudioSink for CpalSink {
    fn sample_rate(&self) -> u32 {
        PLAYBACK_SAMPLE_RATE
    }

    fn start(
        &self,
        samples: Vec<f32>,
        stop: Arc<AtomicBool>,
        done: oneshot::Sender<bool>,
    ) -> Result<()> {
        if samples.is_empty() {
            let _ = done.send(true);
            return Ok(());
        }

        let config = self.config.clone();

        // cpal streams are not Send, so the stream lives and dies on a
        // dedicated thread; the stop flag is the only control surface.
        std::thread::Builder::new()
            .name("parlance-playback".to_string())
            .spawn(move || {
                let finished = run_output_stream(&config, samples, &stop);
                let _ = done.send(finished);
            })
            .map_err(|e| Error::Playback(format!("playback thread: {e}")))?;

        Ok(())
    }
}

/// Drive one output stream to completion or until `stop` is set.
///
/// Returns whether the samples played out naturally.
fn run_output_stream(config: &StreamConfig, samples: Vec<f32>, stop: &Arc<AtomicBool>) -> bool {
    let host = cpal::default_host();
    let Some(device) = host.default_output_device() else {
        tracing::error!("no output device");
        return false;
    };

    let channels = config.channels as usize;
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(Mutex::new(0usize));
    let exhausted = Arc::new(AtomicBool::new(false));

    let cb_samples = Arc::clone(&samples);
    let cb_position = Arc::clone(&position);
    let cb_exhausted = Arc::clone(&exhausted);

    let stream = device.build_output_stream(
        config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            let mut pos = cb_position.lock().unwrap();
            for frame in data.chunks_mut(channels) {
                let sample = if *pos < cb_samples.len() {
                    let s = cb_samples[*pos];
                    *pos += 1;
                    s
                } else {
                    cb_exhausted.store(true, Ordering::Relaxed);
                    0.0
                };
                for out in frame.iter_mut() {
                    *out = sample;
                }
            }
        },
        |err| {
            tracing::error!(error = %err, "audio playback error");
        },
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to build output stream");
            return false;
        }
    };

    if let Err(e) = stream.play() {
        tracing::error!(error = %e, "failed to start output stream");
        return false;
    }

    let duration_ms = sample_count as u64 * 1000 / u64::from(PLAYBACK_SAMPLE_RATE);
    let deadline = std::time::Instant::now() + Duration::from_millis(duration_ms + 500);

    let finished = loop {
        if stop.load(Ordering::SeqCst) {
            break false;
        }
        if exhausted.load(Ordering::Relaxed) {
            break true;
        }
        if std::time::Instant::now() > deadline {
            break true;
        }
        std::thread::sleep(POLL_INTERVAL);
    };

    // dropping the stream halts output immediately
    drop(stream);
    tracing::debug!(samples = sample_count, finished, "playback ended");
    finished
}

/// Decode MP3 bytes to mono f32 samples
///
/// Returns the samples and the decoded sample rate.
///
/// # Errors
///
/// Returns error if the payload is not decodable MP3
pub fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                #[allow(clippy::cast_sign_loss)]
                if sample_rate == 0 {
                    sample_rate = frame.sample_rate as u32;
                }

                if frame.channels == 2 {
                    // stereo: average channels
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        (left + right) / 2.0
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Audio(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Audio("MP3 payload contained no frames".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Decode WAV bytes to mono f32 samples
///
/// Returns the samples and the container's sample rate. Stereo input is
/// averaged down to mono.
///
/// # Errors
///
/// Returns error if the payload is not a readable 16-bit or float WAV
pub fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let mono: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let raw: Vec<f32> = reader
                .samples::<i16>()
                .map(|s| s.map(|v| f32::from(v) / 32768.0))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
            downmix(&raw, spec.channels)
        }
        hound::SampleFormat::Float => {
            let raw: Vec<f32> = reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(format!("WAV decode error: {e}")))?;
            downmix(&raw, spec.channels)
        }
    };

    Ok((mono, spec.sample_rate))
}

fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    let channels = usize::from(channels);
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}
