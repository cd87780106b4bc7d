//! Error types for the Parlance engine

use thiserror::Error;

/// Result type alias for Parlance operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Parlance engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (rejected before any resource is acquired)
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access denied by the OS
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// Capture or playback device missing or lost
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Remote transcription failure
    #[error("recognition error: {0}")]
    Recognition(#[from] RecognitionError),

    /// Remote synthesis failure
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio output failure
    #[error("playback error: {0}")]
    Playback(String),

    /// Audio encoding/decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Session lifecycle misuse (e.g. start while running)
    #[error("session error: {0}")]
    Session(String),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failure modes of a remote transcription call
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// Transport-level failure
    #[error("network failure: {0}")]
    Network(String),

    /// Call exceeded the configured recognition timeout
    #[error("recognition timed out")]
    Timeout,

    /// Service answered successfully but with no usable text
    #[error("empty transcript")]
    EmptyTranscript,

    /// Service-side rejection
    #[error("service error {status}: {message}")]
    Service {
        /// HTTP status code
        status: u16,
        /// Response body or reason
        message: String,
    },
}

/// Coarse error category delivered with session error events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Fatal capture-device fault; requires `stop()` + `start()` to recover
    Device,
    /// Recoverable transcription failure; session keeps listening
    Recognition,
    /// Recoverable synthesis failure; aborts the pending playback only
    Synthesis,
    /// Recoverable audio-output failure; aborts the pending playback only
    Playback,
}

impl Error {
    /// Whether this error is fatal to the capture session
    #[must_use]
    pub const fn is_device_fault(&self) -> bool {
        matches!(self, Self::PermissionDenied(_) | Self::DeviceUnavailable(_))
    }
}
