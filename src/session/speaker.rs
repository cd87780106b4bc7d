//! Playback control
//!
//! Requests synthesized audio for text and plays it through the audio sink.
//! At most one playback is active at a time; the handle's stop flag halts
//! output immediately and is shared with the caller side so `stop()` can
//! release the device synchronously.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use crate::audio::{decode_mp3, decode_wav, resample, AudioSink};
use crate::speech::{AudioFormat, SynthesisService, VoiceOptions};
use crate::{Error, Result};

/// One active audio-output resource.
///
/// Stopping is idempotent; a stopped handle never starts the sink, and a
/// handle stopped mid-output halts it promptly.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    id: u64,
    stop: Arc<AtomicBool>,
}

impl PlaybackHandle {
    /// Identifier used to match completion notifications
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Halt output; safe to call any number of times
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Whether stop has been requested
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Completion of one playback; posted exactly once per `play`
#[derive(Debug)]
pub(crate) struct PlaybackOutcome {
    /// Handle id allocated at `play`
    pub id: u64,
    /// `Ok(true)` natural finish, `Ok(false)` stopped early, `Err` failure
    pub outcome: Result<bool>,
}

/// Synthesizes and plays one text at a time
pub(crate) struct PlaybackController {
    synthesizer: Arc<dyn SynthesisService>,
    sink: Arc<dyn AudioSink>,
    timeout: Duration,
    next_id: u64,
    outcome_tx: mpsc::UnboundedSender<PlaybackOutcome>,
}

impl PlaybackController {
    pub(crate) fn new(
        synthesizer: Arc<dyn SynthesisService>,
        sink: Arc<dyn AudioSink>,
        timeout: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        (
            Self {
                synthesizer,
                sink,
                timeout,
                next_id: 0,
                outcome_tx,
            },
            outcome_rx,
        )
    }

    /// Begin synthesis and playback for `text`, returning the handle.
    ///
    /// The caller must ensure no other handle is active.
    pub(crate) fn play(&mut self, text: String, options: VoiceOptions) -> PlaybackHandle {
        self.next_id += 1;
        let handle = PlaybackHandle {
            id: self.next_id,
            stop: Arc::new(AtomicBool::new(false)),
        };

        tracing::debug!(id = handle.id, chars = text.len(), "playback requested");

        let synthesizer = Arc::clone(&self.synthesizer);
        let sink = Arc::clone(&self.sink);
        let timeout = self.timeout;
        let tx = self.outcome_tx.clone();
        let task_handle = handle.clone();

        tokio::spawn(async move {
            let outcome = run_playback(&*synthesizer, &*sink, timeout, &text, &options, &task_handle).await;
            if let Err(e) = &outcome {
                tracing::warn!(id = task_handle.id, error = %e, "playback failed");
            }
            let _ = tx.send(PlaybackOutcome {
                id: task_handle.id,
                outcome,
            });
        });

        handle
    }

    /// Halt the given playback; idempotent
    pub(crate) fn stop(handle: &PlaybackHandle) {
        handle.stop();
        tracing::debug!(id = handle.id, "playback stopped");
    }
}

/// Synthesize, decode, resample, and drive the sink to completion
async fn run_playback(
    synthesizer: &dyn SynthesisService,
    sink: &dyn AudioSink,
    timeout: Duration,
    text: &str,
    options: &VoiceOptions,
    handle: &PlaybackHandle,
) -> Result<bool> {
    let audio = match tokio::time::timeout(timeout, synthesizer.synthesize(text, options)).await {
        Ok(Ok(audio)) => audio,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(Error::Synthesis("synthesis timed out".to_string())),
    };

    // interrupted while the synthesis call was in flight
    if handle.is_stopped() {
        return Ok(false);
    }

    let format = options.format;
    let sink_rate = sink.sample_rate();
    let samples = tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
        let (samples, rate) = match format {
            AudioFormat::Mp3 => decode_mp3(&audio)?,
            AudioFormat::Wav => decode_wav(&audio)?,
        };
        resample(samples, rate, sink_rate)
    })
    .await
    .map_err(|e| Error::Playback(format!("decode task: {e}")))??;

    if handle.is_stopped() {
        return Ok(false);
    }

    let (done_tx, done_rx) = oneshot::channel();
    sink.start(samples, Arc::clone(&handle.stop), done_tx)?;

    // a dropped sender counts as an interrupted playback
    Ok(done_rx.await.unwrap_or(false))
}
