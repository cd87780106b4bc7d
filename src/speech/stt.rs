//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::error::RecognitionError;
use crate::speech::token::AZURE_TOKEN;
use crate::{Error, Result};

/// Remote transcription boundary.
///
/// Takes raw utterance audio (WAV) plus a session identifier and returns
/// text. Implementations must not retain the audio.
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe one utterance
    ///
    /// # Errors
    ///
    /// Returns a [`RecognitionError`] describing the failure
    async fn transcribe(
        &self,
        audio_wav: Vec<u8>,
        session_id: &str,
    ) -> std::result::Result<String, RecognitionError>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

/// Response from Azure Speech recognition API
#[derive(serde::Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzureSttResponse {
    recognition_status: String,
    #[serde(default)]
    display_text: String,
}

/// STT provider backend
#[derive(Clone, Debug)]
enum SttProvider {
    Whisper,
    Deepgram,
    Azure { region: String, language: String },
}

/// Transcribes speech to text via a remote provider
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    /// Create a new STT instance using Azure Speech
    ///
    /// # Errors
    ///
    /// Returns error if the subscription key or region is missing
    pub fn new_azure(subscription_key: String, region: String, language: String) -> Result<Self> {
        if subscription_key.is_empty() {
            return Err(Error::Config(
                "Azure subscription key required".to_string(),
            ));
        }
        if region.is_empty() {
            return Err(Error::Config("Azure region required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: subscription_key,
            model: String::new(),
            provider: SttProvider::Azure { region, language },
        })
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(
        &self,
        audio: Vec<u8>,
    ) -> std::result::Result<String, RecognitionError> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| RecognitionError::Network(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(RecognitionError::Service {
                status: status.as_u16(),
                message: body,
            });
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        tracing::debug!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(
        &self,
        audio: Vec<u8>,
        session_id: &str,
    ) -> std::result::Result<String, RecognitionError> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true&tag={session_id}",
            self.model
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(RecognitionError::Service {
                status: status.as_u16(),
                message: body,
            });
        }

        let result: DeepgramResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| a.transcript.clone())
            .unwrap_or_default();

        tracing::debug!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }

    /// Transcribe using Azure Speech
    async fn transcribe_azure(
        &self,
        audio: Vec<u8>,
        session_id: &str,
        region: &str,
        language: &str,
    ) -> std::result::Result<String, RecognitionError> {
        tracing::debug!(audio_bytes = audio.len(), "starting Azure transcription");

        let token = AZURE_TOKEN
            .bearer(&self.client, region, &self.api_key)
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        let url = format!(
            "https://{region}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1?language={language}"
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "audio/wav; codecs=audio/pcm; samplerate=16000")
            .header("X-ConnectionId", session_id)
            .body(audio)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Azure STT error");
            return Err(RecognitionError::Service {
                status: status.as_u16(),
                message: body,
            });
        }

        let result: AzureSttResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::Network(e.to_string()))?;

        if result.recognition_status != "Success" {
            return Err(RecognitionError::Service {
                status: status.as_u16(),
                message: result.recognition_status,
            });
        }

        tracing::debug!(transcript = %result.display_text, "transcription complete");
        Ok(result.display_text)
    }
}

#[async_trait]
impl TranscriptionService for SpeechToText {
    async fn transcribe(
        &self,
        audio_wav: Vec<u8>,
        session_id: &str,
    ) -> std::result::Result<String, RecognitionError> {
        match &self.provider {
            SttProvider::Whisper => self.transcribe_whisper(audio_wav).await,
            SttProvider::Deepgram => self.transcribe_deepgram(audio_wav, session_id).await,
            SttProvider::Azure { region, language } => {
                self.transcribe_azure(audio_wav, session_id, region, language)
                    .await
            }
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> RecognitionError {
    if e.is_timeout() {
        RecognitionError::Timeout
    } else {
        RecognitionError::Network(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_requires_api_key() {
        assert!(SpeechToText::new_whisper(String::new(), "whisper-1".into()).is_err());
        assert!(SpeechToText::new_whisper("sk-test".into(), "whisper-1".into()).is_ok());
    }

    #[test]
    fn azure_requires_key_and_region() {
        assert!(SpeechToText::new_azure(String::new(), "westus".into(), "en-US".into()).is_err());
        assert!(SpeechToText::new_azure("key".into(), String::new(), "en-US".into()).is_err());
        assert!(SpeechToText::new_azure("key".into(), "westus".into(), "en-US".into()).is_ok());
    }

    #[test]
    fn azure_response_parses() {
        let body = r#"{"RecognitionStatus":"Success","DisplayText":"hello there.","Offset":0,"Duration":9000000}"#;
        let parsed: AzureSttResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.recognition_status, "Success");
        assert_eq!(parsed.display_text, "hello there.");
    }
}
