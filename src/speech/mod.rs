//! Remote speech services
//!
//! Transcription and synthesis are remote calls behind boundary traits; the
//! engine treats both as opaque, latency-variable, fallible dependencies.

mod stt;
mod token;
mod tts;

pub use stt::{SpeechToText, TranscriptionService};
pub use tts::{AudioFormat, SynthesisService, TextToSpeech, VoiceOptions};
