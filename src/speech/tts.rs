//! Text-to-speech (TTS) processing

use async_trait::async_trait;

use crate::speech::token::AZURE_TOKEN;
use crate::{Error, Result};

/// Encoded audio container returned by synthesis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFormat {
    /// MPEG layer 3
    #[default]
    Mp3,
    /// RIFF WAV, 16-bit PCM
    Wav,
}

/// Voice parameters for one synthesis request
#[derive(Debug, Clone)]
pub struct VoiceOptions {
    /// Provider voice identifier (e.g. "alloy", an ElevenLabs voice id, an
    /// Azure voice name); `None` picks the provider default
    pub voice: Option<String>,
    /// Language tag (e.g. "en-US"); used where the provider supports it
    pub language: Option<String>,
    /// Speech rate multiplier, 1.0 = normal
    pub speed: f32,
    /// Pitch multiplier, 1.0 = normal
    pub pitch: f32,
    /// Volume multiplier, 1.0 = normal
    pub volume: f32,
    /// Requested output container
    pub format: AudioFormat,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            voice: None,
            language: None,
            speed: 1.0,
            pitch: 1.0,
            volume: 1.0,
            format: AudioFormat::Mp3,
        }
    }
}

/// Remote synthesis boundary.
///
/// Takes text plus voice parameters and returns encoded audio in the
/// requested format.
#[async_trait]
pub trait SynthesisService: Send + Sync {
    /// Synthesize speech for `text`
    ///
    /// # Errors
    ///
    /// Returns `Error::Synthesis` if the service fails
    async fn synthesize(&self, text: &str, options: &VoiceOptions) -> Result<Vec<u8>>;
}

/// TTS provider backend
#[derive(Clone, Debug)]
enum TtsProvider {
    OpenAi,
    ElevenLabs,
    Azure { region: String },
}

/// Synthesizes speech from text via a remote provider
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: TtsProvider::OpenAi,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Create a new TTS instance using Azure Speech
    ///
    /// # Errors
    ///
    /// Returns error if the subscription key or region is missing
    pub fn new_azure(subscription_key: String, region: String) -> Result<Self> {
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
            provider: TtsProvider::Azure { region },
        })
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, text: &str, options: &VoiceOptions) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: options.voice.as_deref().unwrap_or("alloy"),
            speed: options.speed,
            response_format: match options.format {
                AudioFormat::Mp3 => "mp3",
                AudioFormat::Wav => "wav",
            },
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, text: &str, options: &VoiceOptions) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let voice = options.voice.as_deref().unwrap_or("21m00Tcm4TlvDq8ikWAM");
        let url = format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}");

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }

    /// Synthesize using Azure Speech
    async fn synthesize_azure(
        &self,
        text: &str,
        options: &VoiceOptions,
        region: &str,
    ) -> Result<Vec<u8>> {
        let token = AZURE_TOKEN.bearer(&self.client, region, &self.api_key).await?;

        let url = format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1");
        let output_format = match options.format {
            AudioFormat::Mp3 => "audio-24khz-48kbitrate-mono-mp3",
            AudioFormat::Wav => "riff-24khz-16bit-mono-pcm",
        };

        let ssml = build_ssml(text, options);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", output_format)
            .body(ssml)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("Azure TTS error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        Ok(audio.to_vec())
    }
}

#[async_trait]
impl SynthesisService for TextToSpeech {
    async fn synthesize(&self, text: &str, options: &VoiceOptions) -> Result<Vec<u8>> {
        match &self.provider {
            TtsProvider::OpenAi => self.synthesize_openai(text, options).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(text, options).await,
            TtsProvider::Azure { region } => self.synthesize_azure(text, options, region).await,
        }
    }
}

/// Build the SSML document carrying the prosody parameters
fn build_ssml(text: &str, options: &VoiceOptions) -> String {
    let language = options.language.as_deref().unwrap_or("en-US");
    let voice = options.voice.as_deref().unwrap_or("en-US-JennyNeural");

    // multipliers map to signed percent offsets
    let rate = (options.speed - 1.0) * 100.0;
    let pitch = (options.pitch - 1.0) * 100.0;
    let volume = (options.volume - 1.0) * 100.0;

    format!(
        "<speak version='1.0' xml:lang='{language}'>\
         <voice xml:lang='{language}' name='{voice}'>\
         <prosody rate='{rate:+.0}%' pitch='{pitch:+.0}%' volume='{volume:+.0}%'>{}</prosody>\
         </voice></speak>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
