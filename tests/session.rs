//! Session state-machine integration tests
//!
//! Drives the full engine with mock audio and speech services: utterance
//! round-trips, stale-result suppression, barge-in, and stop semantics.

use std::sync::atomic::Ordering;

use parlance::{
    AudioFormat, ConversationEngine, EngineConfig, ErrorKind, SessionEvent, SessionState,
    VoiceOptions,
};

mod common;

use common::{
    next_event, expect_quiet, wait_until, DeniedSource, FailingSynthesizer, FrameFeeder,
    GatedTranscriber, InstantTranscriber, MockSink, MockSource, WavSynthesizer,
};

fn config() -> EngineConfig {
    EngineConfig {
        energy_threshold: 0.015,
        silence_threshold_ms: 700,
        min_utterance_ms: 200,
        barge_in_debounce_ms: 150,
        ..EngineConfig::default()
    }
}

fn wav_options() -> VoiceOptions {
    VoiceOptions {
        format: AudioFormat::Wav,
        ..VoiceOptions::default()
    }
}

#[tokio::test]
async fn utterance_round_trip() {
    let (source, source_handle) = MockSource::new();
    let sink = MockSink::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("hello world"),
        WavSynthesizer::new(),
        sink,
    );

    engine.start(config()).unwrap();
    assert_eq!(engine.state(), SessionState::Listening);

    let mut feeder = FrameFeeder::new(source_handle.sender(), &config());
    feeder.voiced(500);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechStarted);

    feeder.silent(720);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Transcript("hello world".to_string())
    );

    wait_until(|| engine.state() == SessionState::Listening, "listening again").await;
    engine.stop();
}

#[tokio::test]
async fn stale_recognition_result_is_discarded() {
    let transcriber = GatedTranscriber::new();
    let (source, source_handle) = MockSource::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        transcriber.clone(),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    engine.start(config()).unwrap();
    let mut feeder = FrameFeeder::new(source_handle.sender(), &config());

    // first utterance
    feeder.voiced(400);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechStarted);
    feeder.silent(720);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);
    transcriber.wait_for_pending(1).await;

    // second utterance while the first is still in flight
    feeder.voiced(400);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechStarted);
    feeder.silent(720);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);
    transcriber.wait_for_pending(2).await;

    // the newer result lands first; the older one arrives late and stale
    transcriber.release_newest(Ok("second"));
    transcriber.release_oldest(Ok("first"));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Transcript("second".to_string())
    );
    // the superseded transcript is never delivered
    expect_quiet(&mut events).await;

    engine.stop();
}

#[tokio::test]
async fn barge_in_stops_playback_at_the_debounce_mark() {
    let (source, source_handle) = MockSource::new();
    let sink = MockSink::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        sink.clone(),
    );

    engine.start(config()).unwrap();
    engine.request_playback("long announcement", wav_options()).unwrap();

    wait_until(|| engine.state() == SessionState::Playing, "playing").await;
    sink.wait_for_started(1).await;

    // 150 ms of continuous speech triggers exactly one barge-in
    let mut feeder = FrameFeeder::new(source_handle.sender(), &config());
    feeder.voiced(150);

    assert_eq!(next_event(&mut events).await, SessionEvent::TtsInterrupted);
    assert!(
        sink.stop_flag(0).load(Ordering::SeqCst),
        "playback not stopped"
    );
    assert_eq!(engine.state(), SessionState::UserSpeaking);

    // further speech produces no second interrupt
    feeder.voiced(300);
    feeder.silent(720);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Transcript("ok".to_string())
    );

    engine.stop();
}

#[tokio::test]
async fn manual_interrupt_behaves_like_barge_in() {
    let (source, _source_handle) = MockSource::new();
    let sink = MockSink::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        sink.clone(),
    );

    engine.start(config()).unwrap();
    engine.request_playback("announcement", wav_options()).unwrap();
    wait_until(|| engine.state() == SessionState::Playing, "playing").await;
    sink.wait_for_started(1).await;

    engine.interrupt().unwrap();
    assert_eq!(next_event(&mut events).await, SessionEvent::TtsInterrupted);
    assert!(sink.stop_flag(0).load(Ordering::SeqCst));

    // no utterance was accumulating, so the session just listens
    wait_until(|| engine.state() == SessionState::Listening, "listening").await;

    engine.stop();
}

#[tokio::test]
async fn natural_playback_completion_returns_to_listening() {
    let (source, _source_handle) = MockSource::new();
    let sink = MockSink::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        sink.clone(),
    );

    engine.start(config()).unwrap();
    engine.request_playback("short reply", wav_options()).unwrap();
    sink.wait_for_started(1).await;

    sink.finish(0, true);
    assert_eq!(next_event(&mut events).await, SessionEvent::PlaybackFinished);
    wait_until(|| engine.state() == SessionState::Listening, "listening").await;

    engine.stop();
}

#[tokio::test]
async fn playback_rejected_outside_listening() {
    let (source, _source_handle) = MockSource::new();
    let sink = MockSink::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        sink.clone(),
    );

    engine.start(config()).unwrap();
    engine.request_playback("first", wav_options()).unwrap();
    wait_until(|| engine.state() == SessionState::Playing, "playing").await;

    // a second request while one is active is a caller error
    engine.request_playback("second", wav_options()).unwrap();
    let SessionEvent::Error { kind, .. } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert_eq!(kind, ErrorKind::Playback);

    // the original playback is unaffected
    assert_eq!(engine.state(), SessionState::Playing);
    assert_eq!(sink.started_count(), 1);

    engine.stop();
}

#[tokio::test]
async fn synthesis_failure_recovers_to_listening() {
    let (source, _source_handle) = MockSource::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        FailingSynthesizer::new(),
        MockSink::new(),
    );

    engine.start(config()).unwrap();
    engine.request_playback("doomed", wav_options()).unwrap();

    let SessionEvent::Error { kind, .. } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert_eq!(kind, ErrorKind::Synthesis);
    wait_until(|| engine.state() == SessionState::Listening, "listening").await;

    engine.stop();
}

#[tokio::test]
async fn empty_transcript_is_a_recoverable_error() {
    let (source, source_handle) = MockSource::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new(""),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    engine.start(config()).unwrap();
    let mut feeder = FrameFeeder::new(source_handle.sender(), &config());

    feeder.voiced(400);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechStarted);
    feeder.silent(720);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);

    let SessionEvent::Error { kind, .. } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert_eq!(kind, ErrorKind::Recognition);
    wait_until(|| engine.state() == SessionState::Listening, "listening").await;

    engine.stop();
}

#[tokio::test]
async fn recognition_timeout_is_reported() {
    let transcriber = GatedTranscriber::new();
    let (source, source_handle) = MockSource::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        transcriber.clone(),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    // a very short recognition timeout; the gate never opens
    engine
        .start(EngineConfig {
            recognition_timeout_ms: 50,
            ..config()
        })
        .unwrap();
    let mut feeder = FrameFeeder::new(source_handle.sender(), &config());

    feeder.voiced(400);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechStarted);
    feeder.silent(720);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);

    let SessionEvent::Error { kind, detail } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert_eq!(kind, ErrorKind::Recognition);
    assert!(detail.contains("timed out"), "unexpected detail: {detail}");

    engine.stop();
}

#[tokio::test]
async fn stop_is_idempotent_and_releases_resources() {
    let (source, source_handle) = MockSource::new();
    let sink = MockSink::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        sink.clone(),
    );

    engine.start(config()).unwrap();
    engine.request_playback("reply", wav_options()).unwrap();
    sink.wait_for_started(1).await;

    engine.stop();
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(source_handle.close_count(), 1);
    assert!(
        sink.stop_flag(0).load(Ordering::SeqCst),
        "active playback not released by stop"
    );

    // a second stop is a no-op with the same end state
    engine.stop();
    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(source_handle.close_count(), 1);

    // no events are delivered after stop() has returned
    expect_quiet(&mut events).await;
}

#[tokio::test]
async fn scenario_d_denied_microphone_stays_idle() {
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        DeniedSource,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    let result = engine.start(config());
    assert!(result.is_err());

    let SessionEvent::Error { kind, .. } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert_eq!(kind, ErrorKind::Device);
    assert_eq!(engine.state(), SessionState::Idle);
}

#[tokio::test]
async fn device_fault_moves_session_to_error() {
    let (source, source_handle) = MockSource::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    engine.start(config()).unwrap();

    source_handle
        .sender()
        .send(parlance::SourceEvent::Failed(
            parlance::Error::DeviceUnavailable("unplugged".to_string()),
        ))
        .unwrap();

    let SessionEvent::Error { kind, .. } = next_event(&mut events).await else {
        panic!("expected an error event");
    };
    assert_eq!(kind, ErrorKind::Device);
    wait_until(|| engine.state() == SessionState::Error, "error state").await;

    // recovery requires an explicit stop + start
    engine.stop();
    assert_eq!(engine.state(), SessionState::Idle);
    engine.start(config()).unwrap();
    assert_eq!(engine.state(), SessionState::Listening);
    engine.stop();
}

#[tokio::test]
async fn restart_supports_new_configuration() {
    let (source, source_handle) = MockSource::new();
    let (mut engine, mut events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    engine.start(config()).unwrap();
    assert!(engine.start(config()).is_err(), "double start must fail");
    engine.stop();

    // shorter silence threshold takes effect in the new session
    let quick = EngineConfig {
        silence_threshold_ms: 300,
        ..config()
    };
    engine.start(quick).unwrap();

    let mut feeder = FrameFeeder::new(source_handle.sender(), &config());
    feeder.voiced(400);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechStarted);
    feeder.silent(330);
    assert_eq!(next_event(&mut events).await, SessionEvent::SpeechEnded);

    engine.stop();
}

#[tokio::test]
async fn invalid_configuration_rejected_before_start() {
    let (source, source_handle) = MockSource::new();
    let (mut engine, _events) = ConversationEngine::with_receiver(
        source,
        InstantTranscriber::new("ok"),
        WavSynthesizer::new(),
        MockSink::new(),
    );

    let bad = EngineConfig {
        energy_threshold: 2.0,
        ..config()
    };
    assert!(engine.start(bad).is_err());
    assert_eq!(engine.state(), SessionState::Idle);
    // the microphone was never opened
    assert_eq!(source_handle.close_count(), 0);
}
