//! Recognition dispatch
//!
//! Sends one utterance at a time to the transcription service. Requests are
//! sequence-stamped; submitting a new one logically supersedes the previous
//! (the network call itself is never aborted — services are not assumed to
//! support cancellation). De-duplication by sequence number is the
//! controller's responsibility.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::error::RecognitionError;
use crate::speech::TranscriptionService;
use crate::vad::Utterance;
use crate::Result;

/// Completion of one submitted request; posted exactly once per submit
#[derive(Debug)]
pub(crate) struct RecognitionOutcome {
    /// Sequence number allocated at submit
    pub seq: u64,
    /// Transcript or failure
    pub result: std::result::Result<String, RecognitionError>,
}

/// Dispatches utterances to the remote transcription service
pub(crate) struct RecognitionGateway {
    service: Arc<dyn TranscriptionService>,
    timeout: Duration,
    sample_rate: u32,
    session_id: String,
    next_seq: u64,
    outcome_tx: mpsc::UnboundedSender<RecognitionOutcome>,
}

impl RecognitionGateway {
    pub(crate) fn new(
        service: Arc<dyn TranscriptionService>,
        timeout: Duration,
        sample_rate: u32,
        session_id: String,
    ) -> (Self, mpsc::UnboundedReceiver<RecognitionOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        (
            Self {
                service,
                timeout,
                sample_rate,
                session_id,
                next_seq: 0,
                outcome_tx,
            },
            outcome_rx,
        )
    }

    /// Submit an utterance, returning its sequence number.
    ///
    /// The utterance is consumed; any outstanding request is superseded.
    ///
    /// # Errors
    ///
    /// Returns error if the utterance cannot be encoded for upload
    pub(crate) fn submit(&mut self, utterance: Utterance) -> Result<u64> {
        self.next_seq += 1;
        let seq = self.next_seq;

        let wav = utterance.to_wav(self.sample_rate)?;

        tracing::debug!(
            seq,
            voiced_ms = utterance.voiced_ms,
            bytes = wav.len(),
            "submitting utterance for recognition"
        );

        let service = Arc::clone(&self.service);
        let timeout = self.timeout;
        let session_id = self.session_id.clone();
        let tx = self.outcome_tx.clone();

        tokio::spawn(async move {
            let result =
                match tokio::time::timeout(timeout, service.transcribe(wav, &session_id)).await {
                    Ok(Ok(text)) if text.trim().is_empty() => {
                        Err(RecognitionError::EmptyTranscript)
                    }
                    Ok(Ok(text)) => Ok(text),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(RecognitionError::Timeout),
                };

            if let Err(e) = &result {
                tracing::warn!(seq, error = %e, "recognition failed");
            }

            // receiver gone means the session stopped; the result is void
            let _ = tx.send(RecognitionOutcome { seq, result });
        });

        Ok(seq)
    }
}
