//! Error types for the Jarvis voice front-end

use thiserror::Error;

use crate::voice::CaptureErrorKind;

/// Result type alias for Jarvis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice front-end
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech capture device error, tagged with its category
    #[error("capture error ({0}): {1}")]
    Capture(CaptureErrorKind, String),

    /// Speech output device error
    #[error("output error: {0}")]
    Output(String),

    /// Chat backend round trip failed
    #[error("backend error: {0}")]
    Backend(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// The controller task has shut down
    #[error("controller is no longer running")]
    ChannelClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Capture category of this error, if it came from a capture device
    ///
    /// Non-capture errors map to [`CaptureErrorKind::Other`]
    #[must_use]
    pub const fn capture_kind(&self) -> CaptureErrorKind {
        match self {
            Self::Capture(kind, _) => *kind,
            Self::Http(_) | Self::Stt(_) => CaptureErrorKind::Network,
            Self::Audio(_) => CaptureErrorKind::DeviceUnavailable,
            _ => CaptureErrorKind::Other,
        }
    }
}
