use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parlance::audio::{AudioSink, AudioSource, CpalSink, CpalSource, SourceEvent};
use parlance::{
    ConversationEngine, EnergyClassifier, FileConfig, FrameClassifier, SessionEvent, SpeechToText,
    TextToSpeech,
};

/// Parlance - continuous voice conversation with barge-in
#[derive(Parser)]
#[command(name = "parlance", version, about)]
struct Cli {
    /// Path to config file (defaults to the platform config dir)
    #[arg(short, long, env = "PARLANCE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run a conversation session, printing events
    Run {
        /// Speak each transcript back through TTS
        #[arg(long)]
        echo: bool,
    },
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,parlance=info",
        1 => "info,parlance=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let file_config = match cli.config.as_deref() {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::load_default(),
    };

    match cli.command.unwrap_or(Command::Run { echo: false }) {
        Command::Run { echo } => run_session(&file_config, echo).await,
        Command::TestMic { duration } => test_mic(&file_config, duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&file_config, &text).await,
    }
}

/// Run a conversation session until interrupted
#[allow(clippy::future_not_send)]
async fn run_session(file_config: &FileConfig, echo: bool) -> anyhow::Result<()> {
    let engine_config = file_config.engine_config();
    engine_config.validate()?;

    let transcriber: Arc<SpeechToText> = Arc::new(file_config.transcriber()?);
    let synthesizer: Arc<TextToSpeech> = Arc::new(file_config.synthesizer()?);
    let sink = Arc::new(CpalSink::new()?);
    let voice_options = file_config.voice_options();

    let (mut engine, mut events) =
        ConversationEngine::with_receiver(CpalSource::new(), transcriber, synthesizer, sink);
    engine.start(engine_config)?;

    println!("listening — speak, ctrl-c to quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::SpeechStarted => println!("[speech started]"),
                    SessionEvent::SpeechEnded => println!("[speech ended]"),
                    SessionEvent::Transcript(text) => {
                        println!("you said: {text}");
                        if echo {
                            engine.request_playback(text, voice_options.clone())?;
                        }
                    }
                    SessionEvent::TtsInterrupted => println!("[interrupted]"),
                    SessionEvent::PlaybackFinished => println!("[playback finished]"),
                    SessionEvent::Error { kind, detail } => {
                        println!("error ({kind:?}): {detail}");
                    }
                }
            }
        }
    }

    engine.stop();
    println!("stopped");
    Ok(())
}

/// Capture for a few seconds and report frame statistics
async fn test_mic(file_config: &FileConfig, duration: u64) -> anyhow::Result<()> {
    let config = file_config.engine_config();
    let classifier = EnergyClassifier::new(config.energy_threshold);

    let mut source = CpalSource::new();
    let mut rx = source.open(&config)?;

    println!("capturing for {duration}s...");

    let mut frames = 0u64;
    let mut voiced = 0u64;
    let mut peak = 0.0f64;

    let deadline = tokio::time::sleep(Duration::from_secs(duration));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            () = &mut deadline => break,
            event = rx.recv() => match event {
                Some(SourceEvent::Frame(frame)) => {
                    let c = classifier.classify(frame);
                    frames += 1;
                    if c.voiced {
                        voiced += 1;
                    }
                    peak = peak.max(c.energy);
                }
                Some(SourceEvent::Gap { missed_frames }) => {
                    println!("gap: {missed_frames} frames dropped");
                }
                Some(SourceEvent::Failed(e)) => return Err(e.into()),
                None => break,
            },
        }
    }

    source.close();
    println!("{frames} frames, {voiced} voiced, peak energy {peak:.4}");
    Ok(())
}

/// Play a short tone through the output device
async fn test_speaker() -> anyhow::Result<()> {
    let sink = CpalSink::new()?;
    let rate = sink.sample_rate();

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..rate)
        .map(|i| {
            let t = i as f32 / rate as f32;
            0.3 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect();

    println!("playing test tone...");
    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    sink.start(samples, stop, done_tx)?;
    let _ = done_rx.await;
    println!("done");
    Ok(())
}

/// Synthesize text and play it
async fn test_tts(file_config: &FileConfig, text: &str) -> anyhow::Result<()> {
    use parlance::audio::{decode_mp3, decode_wav, resample};
    use parlance::{AudioFormat, SynthesisService};

    let synthesizer = file_config.synthesizer()?;
    let options = file_config.voice_options();

    println!("synthesizing...");
    let audio = synthesizer.synthesize(text, &options).await?;
    let (samples, rate) = match options.format {
        AudioFormat::Mp3 => decode_mp3(&audio)?,
        AudioFormat::Wav => decode_wav(&audio)?,
    };

    let sink = CpalSink::new()?;
    let samples = resample(samples, rate, sink.sample_rate())?;

    let stop = Arc::new(AtomicBool::new(false));
    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    sink.start(samples, stop, done_tx)?;
    let _ = done_rx.await;
    println!("done");
    Ok(())
}
