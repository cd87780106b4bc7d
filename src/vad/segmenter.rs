//! Utterance segmentation
//!
//! Turns the classified frame stream into discrete utterances: speech onset
//! opens an utterance, sustained silence closes it, and too-short voiced
//! bursts are discarded as noise. While playback is active the segmenter
//! additionally watches for a debounced speech onset, which the controller
//! uses for barge-in.

use std::collections::VecDeque;

use crate::audio::AudioFrame;
use crate::config::EngineConfig;
use crate::vad::FrameClassification;

/// Leading context retained before the first voiced frame
const PRE_ROLL_MS: u64 = 240;

/// Segmenter state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech observed; buffering pre-roll context
    WaitingForSpeech,
    /// Speech in progress; every frame is appended
    Accumulating,
    /// Silence after speech; counting toward the close threshold
    TrailingSilence,
}

/// Events produced by the segmenter
#[derive(Debug)]
pub enum SegmentEvent {
    /// First voiced frame of a new utterance
    UtteranceStarted,
    /// Utterance closed by sustained silence and long enough to recognize
    UtteranceEnded(Utterance),
    /// Debounced speech onset during playback (barge-in trigger)
    SpeechOnsetDebounced,
}

/// One continuous span of user speech, bounded by silence.
///
/// Includes bounded leading and trailing silence context. Never mutated
/// after the segmenter hands it off.
#[derive(Debug)]
pub struct Utterance {
    /// Frames in arrival order, pre-roll included
    pub frames: Vec<AudioFrame>,
    /// Timestamp of the first voiced frame
    pub started_at_ms: u64,
    /// Timestamp just past the last appended frame
    pub ended_at_ms: u64,
    /// Total voiced duration accumulated
    pub voiced_ms: u64,
}

impl Utterance {
    /// Concatenated samples of all frames
    #[must_use]
    pub fn samples(&self) -> Vec<f32> {
        let total = self.frames.iter().map(|f| f.samples.len()).sum();
        let mut out = Vec::with_capacity(total);
        for frame in &self.frames {
            out.extend_from_slice(&frame.samples);
        }
        out
    }

    /// Encode the utterance as WAV for upload
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self, sample_rate: u32) -> crate::Result<Vec<u8>> {
        crate::audio::samples_to_wav(&self.samples(), sample_rate)
    }

    /// Wall-clock span from first voiced frame to close
    #[must_use]
    pub const fn duration_ms(&self) -> u64 {
        self.ended_at_ms.saturating_sub(self.started_at_ms)
    }
}

/// State machine turning classified frames into utterance events
pub struct UtteranceSegmenter {
    state: SegmenterState,
    sample_rate: u32,
    silence_threshold_ms: u64,
    min_utterance_ms: u64,
    barge_in_debounce_ms: u64,

    pre_roll: VecDeque<AudioFrame>,
    pre_roll_ms: u64,
    frames: Vec<AudioFrame>,
    started_at_ms: u64,
    voiced_ms: u64,
    trailing_silence_ms: u64,

    playback_active: bool,
    onset_run_ms: u64,
    onset_reported: bool,
}

impl UtteranceSegmenter {
    /// Create a segmenter for one session
    #[must_use]
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            state: SegmenterState::WaitingForSpeech,
            sample_rate: config.sample_rate,
            silence_threshold_ms: u64::from(config.silence_threshold_ms),
            min_utterance_ms: u64::from(config.min_utterance_ms),
            barge_in_debounce_ms: u64::from(config.barge_in_debounce_ms),
            pre_roll: VecDeque::new(),
            pre_roll_ms: 0,
            frames: Vec::new(),
            started_at_ms: 0,
            voiced_ms: 0,
            trailing_silence_ms: 0,
            playback_active: false,
            onset_run_ms: 0,
            onset_reported: false,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }

    /// Whether an utterance is currently open
    #[must_use]
    pub const fn is_accumulating(&self) -> bool {
        matches!(
            self.state,
            SegmenterState::Accumulating | SegmenterState::TrailingSilence
        )
    }

    /// Arm or disarm barge-in onset detection.
    ///
    /// The debounce run restarts whenever the flag changes.
    pub fn set_playback_active(&mut self, active: bool) {
        self.playback_active = active;
        self.onset_run_ms = 0;
        self.onset_reported = false;
    }

    /// Process one classified frame, returning any events in order
    pub fn push(&mut self, classification: FrameClassification) -> Vec<SegmentEvent> {
        let FrameClassification { voiced, frame, .. } = classification;
        let dur = frame.duration_ms(self.sample_rate);
        let mut events = Vec::new();

        match self.state {
            SegmenterState::WaitingForSpeech => {
                if voiced {
                    self.started_at_ms = frame.timestamp_ms;
                    self.frames = self.pre_roll.drain(..).collect();
                    self.pre_roll_ms = 0;
                    self.frames.push(frame);
                    self.voiced_ms = dur;
                    self.trailing_silence_ms = 0;
                    self.state = SegmenterState::Accumulating;
                    tracing::trace!(at_ms = self.started_at_ms, "utterance opened");
                    events.push(SegmentEvent::UtteranceStarted);
                } else {
                    self.buffer_pre_roll(frame, dur);
                }
            }
            SegmenterState::Accumulating => {
                self.frames.push(frame);
                if voiced {
                    self.voiced_ms += dur;
                } else {
                    self.trailing_silence_ms = dur;
                    self.state = SegmenterState::TrailingSilence;
                }
            }
            SegmenterState::TrailingSilence => {
                self.frames.push(frame);
                if voiced {
                    // false alarm, speech resumed
                    self.voiced_ms += dur;
                    self.trailing_silence_ms = 0;
                    self.state = SegmenterState::Accumulating;
                } else {
                    self.trailing_silence_ms += dur;
                    if self.trailing_silence_ms >= self.silence_threshold_ms {
                        if let Some(utterance) = self.close_utterance() {
                            events.push(SegmentEvent::UtteranceEnded(utterance));
                        }
                    }
                }
            }
        }

        // Barge-in onset runs independently of segmentation state so a
        // debounce shorter than one frame still fires exactly once.
        if self.playback_active {
            if voiced {
                self.onset_run_ms += dur;
                if !self.onset_reported && self.onset_run_ms >= self.barge_in_debounce_ms {
                    self.onset_reported = true;
                    tracing::debug!(run_ms = self.onset_run_ms, "speech onset debounced");
                    events.push(SegmentEvent::SpeechOnsetDebounced);
                }
            } else {
                self.onset_run_ms = 0;
            }
        }

        events
    }

    /// Discard any in-progress utterance and return to the idle state
    pub fn reset(&mut self) {
        if self.is_accumulating() {
            tracing::debug!(
                frames = self.frames.len(),
                "discarding in-progress utterance"
            );
        }
        self.state = SegmenterState::WaitingForSpeech;
        self.frames.clear();
        self.pre_roll.clear();
        self.pre_roll_ms = 0;
        self.voiced_ms = 0;
        self.trailing_silence_ms = 0;
        self.onset_run_ms = 0;
        self.onset_reported = false;
    }

    fn buffer_pre_roll(&mut self, frame: AudioFrame, dur: u64) {
        self.pre_roll.push_back(frame);
        self.pre_roll_ms += dur;
        while self.pre_roll_ms > PRE_ROLL_MS {
            if let Some(old) = self.pre_roll.pop_front() {
                self.pre_roll_ms -= old.duration_ms(self.sample_rate);
            } else {
                break;
            }
        }
    }

    /// Close the open utterance; `None` when it was too short to keep
    fn close_utterance(&mut self) -> Option<Utterance> {
        let frames = std::mem::take(&mut self.frames);
        let voiced_ms = self.voiced_ms;
        let started_at_ms = self.started_at_ms;
        let ended_at_ms = frames
            .last()
            .map_or(started_at_ms, |f| f.timestamp_ms + f.duration_ms(self.sample_rate));

        self.state = SegmenterState::WaitingForSpeech;
        self.voiced_ms = 0;
        self.trailing_silence_ms = 0;

        if voiced_ms < self.min_utterance_ms {
            tracing::trace!(voiced_ms, "utterance below minimum, discarded");
            return None;
        }

        tracing::debug!(voiced_ms, frames = frames.len(), "utterance closed");
        Some(Utterance {
            frames,
            started_at_ms,
            ended_at_ms,
            voiced_ms,
        })
    }
}
