//! Shared test utilities
//!
//! Frame generators plus mock audio/speech services, so the engine can be
//! exercised without audio hardware or network access.

#![allow(dead_code)]
#![allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use parlance::audio::{samples_to_wav, AudioFrame, AudioSink, AudioSource, SourceEvent};
use parlance::{
    EngineConfig, Error, RecognitionError, Result, SessionEvent, SynthesisService,
    TranscriptionService, VoiceOptions,
};

/// Generate sine wave audio samples
pub fn generate_sine_samples(
    sample_rate: u32,
    frequency: f32,
    duration_secs: f32,
    amplitude: f32,
) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Feeds fabricated frames into a session's source channel
pub struct FrameFeeder {
    tx: mpsc::UnboundedSender<SourceEvent>,
    samples_per_frame: usize,
    frame_duration_ms: u64,
    clock_ms: u64,
    seq: u64,
}

impl FrameFeeder {
    pub fn new(tx: mpsc::UnboundedSender<SourceEvent>, config: &EngineConfig) -> Self {
        Self {
            tx,
            samples_per_frame: config.samples_per_frame(),
            frame_duration_ms: u64::from(config.frame_duration_ms),
            clock_ms: 0,
            seq: 0,
        }
    }

    /// Push `ms` worth of voiced frames (loud sine)
    pub fn voiced(&mut self, ms: u64) {
        self.push_frames(ms, 0.3);
    }

    /// Push `ms` worth of silent frames
    pub fn silent(&mut self, ms: u64) {
        self.push_frames(ms, 0.0);
    }

    fn push_frames(&mut self, ms: u64, amplitude: f32) {
        let mut remaining = ms;
        while remaining > 0 {
            let samples = if amplitude.abs() < f32::EPSILON {
                vec![0.0; self.samples_per_frame]
            } else {
                (0..self.samples_per_frame)
                    .map(|i| {
                        let t = i as f32 / self.samples_per_frame as f32;
                        amplitude * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                    })
                    .collect()
            };
            let frame = AudioFrame {
                samples,
                timestamp_ms: self.clock_ms,
                seq: self.seq,
            };
            let _ = self.tx.send(SourceEvent::Frame(frame));
            self.clock_ms += self.frame_duration_ms;
            self.seq += 1;
            remaining = remaining.saturating_sub(self.frame_duration_ms);
        }
    }
}

/// A controllable audio source backed by a channel
pub struct MockSource {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<SourceEvent>>>>,
    close_count: Arc<AtomicUsize>,
}

/// Test-side handle to a [`MockSource`]
#[derive(Clone)]
pub struct MockSourceHandle {
    slot: Arc<Mutex<Option<mpsc::UnboundedSender<SourceEvent>>>>,
    close_count: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new() -> (Self, MockSourceHandle) {
        let slot = Arc::new(Mutex::new(None));
        let close_count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                slot: Arc::clone(&slot),
                close_count: Arc::clone(&close_count),
            },
            MockSourceHandle { slot, close_count },
        )
    }
}

impl AudioSource for MockSource {
    fn open(&mut self, _config: &EngineConfig) -> Result<mpsc::UnboundedReceiver<SourceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.slot.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    fn close(&mut self) {
        if self.slot.lock().unwrap().take().is_some() {
            self.close_count.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl MockSourceHandle {
    /// Sender into the open session's frame stream
    pub fn sender(&self) -> mpsc::UnboundedSender<SourceEvent> {
        self.slot
            .lock()
            .unwrap()
            .clone()
            .expect("source not open")
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

/// A source whose device is always denied
pub struct DeniedSource;

impl AudioSource for DeniedSource {
    fn open(&mut self, _config: &EngineConfig) -> Result<mpsc::UnboundedReceiver<SourceEvent>> {
        Err(Error::PermissionDenied(
            "microphone access denied".to_string(),
        ))
    }

    fn close(&mut self) {}
}

/// Transcriber that answers immediately with a fixed result
pub struct InstantTranscriber {
    text: String,
}

impl InstantTranscriber {
    pub fn new(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { text: text.into() })
    }
}

#[async_trait]
impl TranscriptionService for InstantTranscriber {
    async fn transcribe(
        &self,
        _audio_wav: Vec<u8>,
        _session_id: &str,
    ) -> std::result::Result<String, RecognitionError> {
        Ok(self.text.clone())
    }
}

/// Transcriber whose calls block until the test releases them, in order
pub struct GatedTranscriber {
    pending: Mutex<VecDeque<oneshot::Sender<std::result::Result<String, RecognitionError>>>>,
}

impl GatedTranscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(VecDeque::new()),
        })
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Wait until `n` calls are in flight
    pub async fn wait_for_pending(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.pending_count() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} pending calls"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Release the oldest in-flight call with the given result
    pub fn release_oldest(&self, result: std::result::Result<&str, RecognitionError>) {
        let sender = self
            .pending
            .lock()
            .unwrap()
            .pop_front()
            .expect("no pending call");
        let _ = sender.send(result.map(str::to_string));
    }

    /// Release the newest in-flight call with the given result
    pub fn release_newest(&self, result: std::result::Result<&str, RecognitionError>) {
        let sender = self
            .pending
            .lock()
            .unwrap()
            .pop_back()
            .expect("no pending call");
        let _ = sender.send(result.map(str::to_string));
    }
}

#[async_trait]
impl TranscriptionService for GatedTranscriber {
    async fn transcribe(
        &self,
        _audio_wav: Vec<u8>,
        _session_id: &str,
    ) -> std::result::Result<String, RecognitionError> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().push_back(tx);
        rx.await
            .unwrap_or_else(|_| Err(RecognitionError::Network("gate dropped".to_string())))
    }
}

/// Synthesizer that returns a short WAV of silence
pub struct WavSynthesizer;

impl WavSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SynthesisService for WavSynthesizer {
    async fn synthesize(&self, _text: &str, _options: &VoiceOptions) -> Result<Vec<u8>> {
        samples_to_wav(&[0.0f32; 3200], 16_000)
    }
}

/// Synthesizer that always fails
pub struct FailingSynthesizer;

impl FailingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl SynthesisService for FailingSynthesizer {
    async fn synthesize(&self, _text: &str, _options: &VoiceOptions) -> Result<Vec<u8>> {
        Err(Error::Synthesis("synthesis backend down".to_string()))
    }
}

struct SinkEntry {
    stop: Arc<AtomicBool>,
    done: Option<oneshot::Sender<bool>>,
}

/// Records started playbacks; completion is driven by the test
pub struct MockSink {
    entries: Mutex<Vec<SinkEntry>>,
}

impl MockSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Vec::new()),
        })
    }

    pub fn started_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Wait until `n` playbacks have started
    pub async fn wait_for_started(&self, n: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while self.started_count() < n {
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {n} started playbacks"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop flag of the `index`-th playback
    pub fn stop_flag(&self, index: usize) -> Arc<AtomicBool> {
        Arc::clone(&self.entries.lock().unwrap()[index].stop)
    }

    /// Complete the `index`-th playback (`true` = natural finish)
    pub fn finish(&self, index: usize, natural: bool) {
        let done = self.entries.lock().unwrap()[index]
            .done
            .take()
            .expect("playback already finished");
        let _ = done.send(natural);
    }
}

impl AudioSink for MockSink {
    fn sample_rate(&self) -> u32 {
        16_000
    }

    fn start(
        &self,
        _samples: Vec<f32>,
        stop: Arc<AtomicBool>,
        done: oneshot::Sender<bool>,
    ) -> Result<()> {
        self.entries.lock().unwrap().push(SinkEntry {
            stop,
            done: Some(done),
        });
        Ok(())
    }
}

/// Receive the next session event, failing the test on timeout
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

/// Assert no event arrives within a short window
pub async fn expect_quiet(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) {
    let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(
        result.is_err(),
        "unexpected event: {:?}",
        result.expect("channel closed")
    );
}

/// Poll until the predicate holds, failing the test on timeout
pub async fn wait_until(mut predicate: impl FnMut() -> bool, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
