//! Audio capture, playback, and sample utilities
//!
//! Capture produces fixed-duration [`AudioFrame`]s; playback consumes decoded
//! synthesis audio. Remote services exchange WAV (upload) and MP3/WAV
//! (download), converted here.

mod capture;
mod playback;

pub use capture::{AudioSource, CpalSource};
pub use playback::{AudioSink, CpalSink, PLAYBACK_SAMPLE_RATE, decode_mp3, decode_wav};

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// One fixed-duration block of mono PCM samples.
///
/// Produced continuously while a session is active, consumed exactly once by
/// the classifier, and owned by whoever holds it — frames are moved, never
/// shared.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Milliseconds since capture started, derived from the sample clock
    pub timestamp_ms: u64,
    /// Monotonic frame counter
    pub seq: u64,
}

impl AudioFrame {
    /// Duration of this frame at the given sample rate
    #[must_use]
    pub fn duration_ms(&self, sample_rate: u32) -> u64 {
        (self.samples.len() as u64 * 1000) / u64::from(sample_rate)
    }
}

/// Events delivered by an [`AudioSource`]
#[derive(Debug)]
pub enum SourceEvent {
    /// One captured frame
    Frame(AudioFrame),
    /// Frames were dropped by the device; the stream continues
    Gap {
        /// Estimated number of whole frames lost
        missed_frames: u64,
    },
    /// The capture stream failed; the session cannot continue
    Failed(Error),
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Resample mono audio from one rate to another
///
/// Returns the input untouched when the rates already match.
///
/// # Errors
///
/// Returns error if the resampler cannot be constructed or fails
pub fn resample(samples: Vec<f32>, from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, 1024, 2, 1)
        .map_err(|e| Error::Audio(format!("resampler init: {e}")))?;

    let mut out = Vec::with_capacity(samples.len() * to as usize / from as usize + 1024);
    let mut pos = 0;

    loop {
        let needed = resampler.input_frames_next();
        if pos + needed > samples.len() {
            break;
        }
        let chunk = vec![samples[pos..pos + needed].to_vec()];
        let processed = resampler
            .process(&chunk, None)
            .map_err(|e| Error::Audio(format!("resample: {e}")))?;
        out.extend_from_slice(&processed[0]);
        pos += needed;
    }

    if pos < samples.len() {
        let tail = vec![samples[pos..].to_vec()];
        let processed = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(|e| Error::Audio(format!("resample tail: {e}")))?;
        out.extend_from_slice(&processed[0]);
    }

    Ok(out)
}
