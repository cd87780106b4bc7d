//! Conversation session orchestration
//!
//! The controller owns the session state machine and wires the frame
//! pipeline (classify → segment) to the recognition gateway, the playback
//! controller, and the caller's event stream. Frame processing is
//! synchronous per frame; only recognition and synthesis suspend, each on
//! its own task, so the pipeline keeps running while a previous utterance is
//! still being recognized or played back.

mod recognizer;
mod speaker;

pub use speaker::PlaybackHandle;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::audio::{AudioFrame, AudioSink, AudioSource, SourceEvent};
use crate::config::EngineConfig;
use crate::error::ErrorKind;
use crate::session::recognizer::{RecognitionGateway, RecognitionOutcome};
use crate::session::speaker::{PlaybackController, PlaybackOutcome};
use crate::speech::{SynthesisService, TranscriptionService, VoiceOptions};
use crate::vad::{
    EnergyClassifier, FrameClassifier, SegmentEvent, Utterance, UtteranceSegmenter,
};
use crate::{Error, Result};

/// Session state, owned and mutated only by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session running
    Idle,
    /// Capturing, waiting for speech
    Listening,
    /// An utterance is in progress
    UserSpeaking,
    /// An utterance was submitted; waiting for the transcript
    Recognizing,
    /// Synthesized audio is being produced or played
    Playing,
    /// Fatal capture fault; requires `stop()` + `start()` to recover
    Error,
}

/// Events delivered to the caller, in the order they occurred
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The user started speaking
    SpeechStarted,
    /// The current utterance closed and was submitted for recognition
    SpeechEnded,
    /// A recognition result for the current utterance
    Transcript(String),
    /// Playback was interrupted by the user speaking (barge-in)
    TtsInterrupted,
    /// Playback ran to natural completion
    PlaybackFinished,
    /// A session-level failure
    Error {
        /// Coarse category
        kind: ErrorKind,
        /// Human-readable detail
        detail: String,
    },
}

/// Commands from the engine handle into the session task
enum Command {
    Play { text: String, options: VoiceOptions },
    Interrupt,
    Stop,
}

/// The continuous voice-conversation engine.
///
/// Construct with [`ConversationEngine::with_receiver`], then `start` a
/// session. Events arrive on the returned receiver; they are never delivered
/// after `stop()` has returned.
pub struct ConversationEngine {
    source: Box<dyn AudioSource>,
    classifier: Option<Arc<dyn FrameClassifier>>,
    transcriber: Arc<dyn TranscriptionService>,
    synthesizer: Arc<dyn SynthesisService>,
    sink: Arc<dyn AudioSink>,
    session_id: String,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    state: Arc<Mutex<SessionState>>,
    active_playback: Arc<Mutex<Option<PlaybackHandle>>>,
    stopped: Arc<AtomicBool>,
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
}

impl ConversationEngine {
    /// Create an engine and the receiver its session events arrive on
    #[must_use]
    pub fn with_receiver(
        source: impl AudioSource + 'static,
        transcriber: Arc<dyn TranscriptionService>,
        synthesizer: Arc<dyn SynthesisService>,
        sink: Arc<dyn AudioSink>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let engine = Self {
            source: Box::new(source),
            classifier: None,
            transcriber,
            synthesizer,
            sink,
            session_id: generate_session_id(),
            events_tx,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            active_playback: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(true)),
            cmd_tx: None,
        };
        (engine, events_rx)
    }

    /// Substitute a custom frame classifier (default: energy threshold)
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn FrameClassifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    /// Session identifier passed to the transcription service
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.lock().map_or(SessionState::Error, |s| *s)
    }

    /// Start a session with the given configuration.
    ///
    /// Must be called within a tokio runtime. The configuration is immutable
    /// for the session's lifetime; stop and start again to change it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for invalid configuration (before any
    /// resource is acquired), `Error::Session` if already running, or a
    /// device error if capture cannot start — in the device case an
    /// `Error` event is also delivered and the state remains `Idle`.
    pub fn start(&mut self, config: EngineConfig) -> Result<()> {
        if self.cmd_tx.is_some() {
            return Err(Error::Session("session already running".to_string()));
        }
        config.validate()?;

        let source_rx = match self.source.open(&config) {
            Ok(rx) => rx,
            Err(e) => {
                let _ = self.events_tx.send(SessionEvent::Error {
                    kind: ErrorKind::Device,
                    detail: e.to_string(),
                });
                return Err(e);
            }
        };

        // fresh shared handles per session: a previous session's task may
        // still be draining, and it must not touch the new session's state
        self.stopped = Arc::new(AtomicBool::new(false));
        self.state = Arc::new(Mutex::new(SessionState::Listening));
        self.active_playback = Arc::new(Mutex::new(None));

        let classifier = self.classifier.clone().unwrap_or_else(|| {
            Arc::new(EnergyClassifier::new(config.energy_threshold)) as Arc<dyn FrameClassifier>
        });

        let (gateway, rec_rx) = RecognitionGateway::new(
            Arc::clone(&self.transcriber),
            Duration::from_millis(config.recognition_timeout_ms),
            config.sample_rate,
            self.session_id.clone(),
        );
        let (playback, play_rx) = PlaybackController::new(
            Arc::clone(&self.synthesizer),
            Arc::clone(&self.sink),
            Duration::from_millis(config.synthesis_timeout_ms),
        );
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let task = SessionTask {
            state: Arc::clone(&self.state),
            classifier,
            segmenter: UtteranceSegmenter::new(&config),
            gateway,
            playback,
            source_rx,
            cmd_rx,
            rec_rx,
            play_rx,
            events_tx: self.events_tx.clone(),
            stopped: Arc::clone(&self.stopped),
            active_playback: Arc::clone(&self.active_playback),
            current_seq: 0,
            pending_speech_started: false,
        };
        tokio::spawn(task.run());

        self.cmd_tx = Some(cmd_tx);
        tracing::info!(session = %self.session_id, "session started");
        Ok(())
    }

    /// Stop the session and release all resources; idempotent.
    ///
    /// The microphone and any active playback are released synchronously.
    /// Outstanding recognition or synthesis calls finish in the background
    /// and their results are discarded. No event is delivered after this
    /// returns.
    pub fn stop(&mut self) {
        let Some(cmd_tx) = self.cmd_tx.take() else {
            return;
        };
        self.stopped.store(true, Ordering::SeqCst);
        self.source.close();
        if let Ok(mut active) = self.active_playback.lock() {
            if let Some(handle) = active.take() {
                handle.stop();
            }
        }
        if let Ok(mut state) = self.state.lock() {
            *state = SessionState::Idle;
        }
        let _ = cmd_tx.send(Command::Stop);
        tracing::info!(session = %self.session_id, "session stopped");
    }

    /// Ask the session to synthesize and play `text`.
    ///
    /// Only honored while the session is `Listening`; anything else is a
    /// caller error reported through the event stream.
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if no session is running
    pub fn request_playback(&self, text: impl Into<String>, options: VoiceOptions) -> Result<()> {
        self.send(Command::Play {
            text: text.into(),
            options,
        })
    }

    /// Manually trigger barge-in, as if a debounced speech onset occurred
    ///
    /// # Errors
    ///
    /// Returns `Error::Session` if no session is running
    pub fn interrupt(&self) -> Result<()> {
        self.send(Command::Interrupt)
    }

    fn send(&self, command: Command) -> Result<()> {
        let Some(tx) = &self.cmd_tx else {
            return Err(Error::Session("session not running".to_string()));
        };
        tx.send(command)
            .map_err(|_| Error::Session("session task ended".to_string()))
    }
}

impl Drop for ConversationEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The single-consumer pipeline and state machine, one per session
struct SessionTask {
    state: Arc<Mutex<SessionState>>,
    classifier: Arc<dyn FrameClassifier>,
    segmenter: UtteranceSegmenter,
    gateway: RecognitionGateway,
    playback: PlaybackController,
    source_rx: mpsc::UnboundedReceiver<SourceEvent>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    rec_rx: mpsc::UnboundedReceiver<RecognitionOutcome>,
    play_rx: mpsc::UnboundedReceiver<PlaybackOutcome>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    stopped: Arc<AtomicBool>,
    active_playback: Arc<Mutex<Option<PlaybackHandle>>>,
    /// Sequence number of the one outstanding recognition request (0 = none)
    current_seq: u64,
    /// An utterance opened during playback, awaiting barge-in or release
    pending_speech_started: bool,
}

impl SessionTask {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.source_rx.recv() => match event {
                    Some(SourceEvent::Frame(frame)) => self.on_frame(frame),
                    Some(SourceEvent::Gap { missed_frames }) => {
                        tracing::warn!(missed_frames, "frame gap in capture stream");
                    }
                    Some(SourceEvent::Failed(e)) => self.on_device_fault(&e),
                    None => {
                        if !self.stopped.load(Ordering::SeqCst) {
                            self.on_device_fault(&Error::DeviceUnavailable(
                                "capture stream closed".to_string(),
                            ));
                        }
                        break;
                    }
                },
                Some(command) = self.cmd_rx.recv() => match command {
                    Command::Stop => break,
                    Command::Play { text, options } => self.on_play_request(text, options),
                    Command::Interrupt => self.on_interrupt(),
                },
                Some(outcome) = self.rec_rx.recv() => self.on_recognition(outcome),
                Some(outcome) = self.play_rx.recv() => self.on_playback(outcome),
            }
        }

        // the handle side usually released this already; cover abnormal exits
        if let Some(handle) = self.active_playback.lock().unwrap().take() {
            handle.stop();
        }
        self.segmenter.reset();
        tracing::debug!("session task ended");
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        if matches!(self.snapshot(), SessionState::Idle | SessionState::Error) {
            return;
        }
        let classification = self.classifier.classify(frame);
        for event in self.segmenter.push(classification) {
            match event {
                SegmentEvent::UtteranceStarted => self.on_utterance_started(),
                SegmentEvent::SpeechOnsetDebounced => self.on_speech_onset(),
                SegmentEvent::UtteranceEnded(utterance) => self.on_utterance_ended(utterance),
            }
        }
    }

    fn on_utterance_started(&mut self) {
        match self.snapshot() {
            SessionState::Listening | SessionState::Recognizing => {
                self.set_state(SessionState::UserSpeaking);
                self.emit(SessionEvent::SpeechStarted);
            }
            SessionState::Playing => {
                // held until barge-in fires or playback ends
                self.pending_speech_started = true;
            }
            _ => {}
        }
    }

    /// Barge-in: debounced speech onset while playing
    fn on_speech_onset(&mut self) {
        if self.snapshot() != SessionState::Playing {
            return;
        }
        if let Some(handle) = self.active_playback.lock().unwrap().take() {
            PlaybackController::stop(&handle);
        }
        self.segmenter.set_playback_active(false);
        self.pending_speech_started = false;
        // the interrupting utterance keeps accumulating from its onset
        self.set_state(SessionState::UserSpeaking);
        self.emit(SessionEvent::TtsInterrupted);
    }

    fn on_utterance_ended(&mut self, utterance: Utterance) {
        match self.snapshot() {
            SessionState::UserSpeaking => {
                self.emit(SessionEvent::SpeechEnded);
                self.submit(utterance);
            }
            SessionState::Playing => {
                // several sub-debounce bursts summed past the minimum:
                // a barge-in that is already complete
                if let Some(handle) = self.active_playback.lock().unwrap().take() {
                    PlaybackController::stop(&handle);
                }
                self.segmenter.set_playback_active(false);
                self.pending_speech_started = false;
                self.emit(SessionEvent::TtsInterrupted);
                self.emit(SessionEvent::SpeechEnded);
                self.submit(utterance);
            }
            other => {
                tracing::warn!(state = ?other, "utterance closed in unexpected state, discarded");
            }
        }
    }

    fn submit(&mut self, utterance: Utterance) {
        match self.gateway.submit(utterance) {
            Ok(seq) => {
                self.current_seq = seq;
                self.set_state(SessionState::Recognizing);
            }
            Err(e) => {
                self.emit(SessionEvent::Error {
                    kind: ErrorKind::Recognition,
                    detail: e.to_string(),
                });
                self.set_state(SessionState::Listening);
            }
        }
    }

    fn on_recognition(&mut self, outcome: RecognitionOutcome) {
        if outcome.seq != self.current_seq {
            tracing::trace!(
                seq = outcome.seq,
                current = self.current_seq,
                "stale recognition result discarded"
            );
            return;
        }

        match outcome.result {
            Ok(text) => {
                tracing::info!(seq = outcome.seq, transcript = %text, "recognition complete");
                self.emit(SessionEvent::Transcript(text));
            }
            Err(e) => {
                self.emit(SessionEvent::Error {
                    kind: ErrorKind::Recognition,
                    detail: e.to_string(),
                });
            }
        }

        // if the user is already speaking again, stay with them
        if self.snapshot() == SessionState::Recognizing {
            self.set_state(SessionState::Listening);
        }
    }

    fn on_play_request(&mut self, text: String, options: VoiceOptions) {
        let state = self.snapshot();
        if state != SessionState::Listening {
            tracing::warn!(state = ?state, "playback requested outside Listening");
            self.emit(SessionEvent::Error {
                kind: ErrorKind::Playback,
                detail: format!("playback rejected: session is {state:?}"),
            });
            return;
        }

        let handle = self.playback.play(text, options);
        *self.active_playback.lock().unwrap() = Some(handle);
        self.segmenter.set_playback_active(true);
        self.set_state(SessionState::Playing);
    }

    /// Manual barge-in trigger
    fn on_interrupt(&mut self) {
        if self.snapshot() != SessionState::Playing {
            return;
        }
        if let Some(handle) = self.active_playback.lock().unwrap().take() {
            PlaybackController::stop(&handle);
        }
        self.segmenter.set_playback_active(false);
        self.pending_speech_started = false;
        self.emit(SessionEvent::TtsInterrupted);
        if self.segmenter.is_accumulating() {
            self.set_state(SessionState::UserSpeaking);
        } else {
            self.set_state(SessionState::Listening);
        }
    }

    fn on_playback(&mut self, outcome: PlaybackOutcome) {
        let active_id = self
            .active_playback
            .lock()
            .unwrap()
            .as_ref()
            .map(PlaybackHandle::id);
        if active_id != Some(outcome.id) {
            // finished after being superseded or interrupted; void
            tracing::trace!(id = outcome.id, "stale playback outcome discarded");
            return;
        }
        self.active_playback.lock().unwrap().take();

        match outcome.outcome {
            Ok(true) => {
                self.emit(SessionEvent::PlaybackFinished);
                self.leave_playing();
            }
            Ok(false) => {
                tracing::debug!(id = outcome.id, "playback ended without completing");
                self.leave_playing();
            }
            Err(e) => {
                let kind = match &e {
                    Error::Synthesis(_) => ErrorKind::Synthesis,
                    _ => ErrorKind::Playback,
                };
                self.emit(SessionEvent::Error {
                    kind,
                    detail: e.to_string(),
                });
                self.leave_playing();
            }
        }
    }

    /// Transition out of `Playing`, releasing a held speech start if the
    /// user is mid-utterance
    fn leave_playing(&mut self) {
        self.segmenter.set_playback_active(false);
        if self.snapshot() != SessionState::Playing {
            self.pending_speech_started = false;
            return;
        }
        if self.pending_speech_started && self.segmenter.is_accumulating() {
            self.emit(SessionEvent::SpeechStarted);
            self.set_state(SessionState::UserSpeaking);
        } else {
            self.set_state(SessionState::Listening);
        }
        self.pending_speech_started = false;
    }

    fn on_device_fault(&mut self, error: &Error) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }
        tracing::error!(error = %error, "capture device fault");
        self.emit(SessionEvent::Error {
            kind: ErrorKind::Device,
            detail: error.to_string(),
        });
        self.segmenter.reset();
        self.set_state(SessionState::Error);
    }

    fn emit(&self, event: SessionEvent) {
        if !self.stopped.load(Ordering::SeqCst) {
            let _ = self.events_tx.send(event);
        }
    }

    fn snapshot(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "session state");
            *state = next;
        }
    }
}

fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("parlance-{millis:x}")
}
