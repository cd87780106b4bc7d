//! Parlance - continuous voice-conversation engine
//!
//! Keeps a microphone channel open indefinitely, classifies incoming audio
//! as speech or silence in real time, segments the stream into discrete
//! utterances, dispatches each utterance to a remote speech-recognition
//! service, plays back synthesized responses, and lets the user interrupt
//! an in-progress playback by simply starting to talk (barge-in).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    ConversationEngine                     │
//! │        session state machine · barge-in · events          │
//! └───────┬──────────────┬─────────────────┬─────────────────┘
//!         │              │                 │
//! ┌───────▼──────┐ ┌─────▼───────────┐ ┌───▼──────────────┐
//! │ AudioSource  │ │ Recognition     │ │ Playback         │
//! │ Classifier   │ │ Gateway         │ │ Controller       │
//! │ Segmenter    │ │ (remote STT)    │ │ (remote TTS)     │
//! └──────────────┘ └─────────────────┘ └──────────────────┘
//! ```
//!
//! The frame pipeline (capture → classify → segment) is synchronous per
//! frame; only the remote recognition and synthesis calls suspend, each on
//! its own task. Stale results are discarded by sequence number.

pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod speech;
pub mod vad;

pub use audio::{AudioFrame, AudioSink, AudioSource, CpalSink, CpalSource, SourceEvent};
pub use config::{EngineConfig, FileConfig};
pub use error::{Error, ErrorKind, RecognitionError, Result};
pub use session::{ConversationEngine, PlaybackHandle, SessionEvent, SessionState};
pub use speech::{
    AudioFormat, SpeechToText, SynthesisService, TextToSpeech, TranscriptionService, VoiceOptions,
};
pub use vad::{
    EnergyClassifier, FrameClassification, FrameClassifier, SegmentEvent, Utterance,
    UtteranceSegmenter,
};
