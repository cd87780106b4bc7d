//! TOML configuration file loading
//!
//! Supports `~/.config/parlance/config.toml` as a persistent config source.
//! All fields are optional — the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::config::EngineConfig;
use crate::speech::{AudioFormat, SpeechToText, TextToSpeech, VoiceOptions};
use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    /// Engine tuning parameters
    #[serde(default)]
    pub engine: EngineFileConfig,

    /// Remote transcription service
    #[serde(default)]
    pub recognition: RecognitionFileConfig,

    /// Remote synthesis service
    #[serde(default)]
    pub synthesis: SynthesisFileConfig,
}

/// Engine tuning parameters
#[derive(Debug, Default, Deserialize)]
pub struct EngineFileConfig {
    /// Capture sample rate in Hz
    pub sample_rate: Option<u32>,

    /// Frame duration in milliseconds
    pub frame_duration_ms: Option<u32>,

    /// Normalized energy threshold in [0, 1]
    pub energy_threshold: Option<f64>,

    /// Silence that closes an utterance, in milliseconds
    pub silence_threshold_ms: Option<u32>,

    /// Minimum voiced duration for recognition, in milliseconds
    pub min_utterance_ms: Option<u32>,

    /// Voiced duration that triggers barge-in, in milliseconds
    pub barge_in_debounce_ms: Option<u32>,

    /// Recognition call timeout in milliseconds
    pub recognition_timeout_ms: Option<u64>,

    /// Synthesis call timeout in milliseconds
    pub synthesis_timeout_ms: Option<u64>,
}

/// Transcription service configuration
#[derive(Debug, Default, Deserialize)]
pub struct RecognitionFileConfig {
    /// Provider: "whisper", "deepgram", or "azure"
    pub provider: Option<String>,

    /// API key or subscription key (env `PARLANCE_STT_API_KEY` overrides)
    pub api_key: Option<String>,

    /// Provider model identifier (e.g. "whisper-1", "nova-2")
    pub model: Option<String>,

    /// Service region (Azure only, e.g. "westeurope")
    pub region: Option<String>,

    /// Recognition language tag (e.g. "en-US")
    pub language: Option<String>,
}

/// Synthesis service configuration
#[derive(Debug, Default, Deserialize)]
pub struct SynthesisFileConfig {
    /// Provider: "openai", "elevenlabs", or "azure"
    pub provider: Option<String>,

    /// API key or subscription key (env `PARLANCE_TTS_API_KEY` overrides)
    pub api_key: Option<String>,

    /// Provider model identifier (e.g. "tts-1")
    pub model: Option<String>,

    /// Voice identifier (e.g. "alloy", an ElevenLabs voice id, an Azure voice name)
    pub voice: Option<String>,

    /// Synthesis language tag (e.g. "en-US")
    pub language: Option<String>,

    /// Speech rate multiplier
    pub speed: Option<f32>,

    /// Pitch multiplier
    pub pitch: Option<f32>,

    /// Volume multiplier
    pub volume: Option<f32>,

    /// Output format: "mp3" or "wav"
    pub format: Option<String>,

    /// Service region (Azure only)
    pub region: Option<String>,
}

impl FileConfig {
    /// Load a config file from `path`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Load from the standard path, falling back to defaults if absent
    #[must_use]
    pub fn load_default() -> Self {
        let Some(path) = config_file_path() else {
            return Self::default();
        };
        if !path.exists() {
            let mut config = Self::default();
            config.apply_env();
            return config;
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!(path = %path.display(), error = %e, "failed to load config file, using defaults");
            Self::default()
        })
    }

    /// Overlay API keys from the environment
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("PARLANCE_STT_API_KEY") {
            self.recognition.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("PARLANCE_TTS_API_KEY") {
            self.synthesis.api_key = Some(key);
        }
    }

    /// Build the engine configuration, file values over defaults
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        let defaults = EngineConfig::default();
        EngineConfig {
            sample_rate: self.engine.sample_rate.unwrap_or(defaults.sample_rate),
            frame_duration_ms: self
                .engine
                .frame_duration_ms
                .unwrap_or(defaults.frame_duration_ms),
            energy_threshold: self
                .engine
                .energy_threshold
                .unwrap_or(defaults.energy_threshold),
            silence_threshold_ms: self
                .engine
                .silence_threshold_ms
                .unwrap_or(defaults.silence_threshold_ms),
            min_utterance_ms: self
                .engine
                .min_utterance_ms
                .unwrap_or(defaults.min_utterance_ms),
            barge_in_debounce_ms: self
                .engine
                .barge_in_debounce_ms
                .unwrap_or(defaults.barge_in_debounce_ms),
            recognition_timeout_ms: self
                .engine
                .recognition_timeout_ms
                .unwrap_or(defaults.recognition_timeout_ms),
            synthesis_timeout_ms: self
                .engine
                .synthesis_timeout_ms
                .unwrap_or(defaults.synthesis_timeout_ms),
        }
    }

    /// Build the transcription client described by the `[recognition]` section
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the provider is unknown or a key is missing
    pub fn transcriber(&self) -> Result<SpeechToText> {
        let section = &self.recognition;
        let api_key = section.api_key.clone().unwrap_or_default();
        match section.provider.as_deref().unwrap_or("whisper") {
            "whisper" => SpeechToText::new_whisper(
                api_key,
                section.model.clone().unwrap_or_else(|| "whisper-1".into()),
            ),
            "deepgram" => SpeechToText::new_deepgram(
                api_key,
                section.model.clone().unwrap_or_else(|| "nova-2".into()),
            ),
            "azure" => SpeechToText::new_azure(
                api_key,
                section.region.clone().unwrap_or_default(),
                section.language.clone().unwrap_or_else(|| "en-US".into()),
            ),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }

    /// Build the synthesis client described by the `[synthesis]` section
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the provider is unknown or a key is missing
    pub fn synthesizer(&self) -> Result<TextToSpeech> {
        let section = &self.synthesis;
        let api_key = section.api_key.clone().unwrap_or_default();
        match section.provider.as_deref().unwrap_or("openai") {
            "openai" => TextToSpeech::new_openai(
                api_key,
                section.model.clone().unwrap_or_else(|| "tts-1".into()),
            ),
            "elevenlabs" => TextToSpeech::new_elevenlabs(
                api_key,
                section
                    .model
                    .clone()
                    .unwrap_or_else(|| "eleven_monolingual_v1".into()),
            ),
            "azure" => {
                TextToSpeech::new_azure(api_key, section.region.clone().unwrap_or_default())
            }
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }

    /// Voice options described by the `[synthesis]` section
    #[must_use]
    pub fn voice_options(&self) -> VoiceOptions {
        let defaults = VoiceOptions::default();
        VoiceOptions {
            voice: self.synthesis.voice.clone(),
            language: self.synthesis.language.clone(),
            speed: self.synthesis.speed.unwrap_or(defaults.speed),
            pitch: self.synthesis.pitch.unwrap_or(defaults.pitch),
            volume: self.synthesis.volume.unwrap_or(defaults.volume),
            format: match self.synthesis.format.as_deref() {
                Some("wav") => AudioFormat::Wav,
                _ => AudioFormat::Mp3,
            },
        }
    }
}

/// Return the config file path: `~/.config/parlance/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("parlance").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: FileConfig = toml::from_str("").unwrap();
        let engine = config.engine_config();
        assert_eq!(engine.sample_rate, 16_000);
        assert_eq!(engine.silence_threshold_ms, 700);
    }

    #[test]
    fn partial_overlay() {
        let config: FileConfig = toml::from_str(
            r#"
            [engine]
            energy_threshold = 0.03
            silence_threshold_ms = 500

            [recognition]
            provider = "deepgram"
            api_key = "dg-test"
            "#,
        )
        .unwrap();

        let engine = config.engine_config();
        assert!((engine.energy_threshold - 0.03).abs() < f64::EPSILON);
        assert_eq!(engine.silence_threshold_ms, 500);
        // untouched fields keep defaults
        assert_eq!(engine.min_utterance_ms, 200);

        assert!(config.transcriber().is_ok());
    }

    #[test]
    fn unknown_provider_rejected() {
        let config: FileConfig = toml::from_str(
            r#"
            [recognition]
            provider = "morse"
            "#,
        )
        .unwrap();
        assert!(matches!(config.transcriber(), Err(Error::Config(_))));
    }

    #[test]
    fn voice_options_overlay() {
        let config: FileConfig = toml::from_str(
            r#"
            [synthesis]
            voice = "alloy"
            speed = 1.2
            format = "wav"
            "#,
        )
        .unwrap();
        let options = config.voice_options();
        assert_eq!(options.voice.as_deref(), Some("alloy"));
        assert!((options.speed - 1.2).abs() < f32::EPSILON);
        assert_eq!(options.format, AudioFormat::Wav);
    }
}
