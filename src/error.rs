//! Error types for Lumina Spark

use thiserror::Error;

use crate::voice::DeviceErrorKind;

/// Result type alias for Lumina operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Lumina Spark
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error (missing backend credentials, invalid settings,
    /// unavailable speech device)
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech device reported an error
    #[error("speech device error: {0}")]
    Device(DeviceErrorKind),

    /// Answer or synthesis service rejected the request
    #[error("service error: {error}{}", details.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    Service {
        /// Short error reported by the service
        error: String,
        /// Optional detail message
        details: Option<String>,
    },

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio error
    #[error("audio error: {0}")]
    Audio(String),

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

    /// URL parsing error
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// Base64 decoding error
    #[error("base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

impl Error {
    /// Build a service error without details
    #[must_use]
    pub fn service(error: impl Into<String>) -> Self {
        Self::Service {
            error: error.into(),
            details: None,
        }
    }
}
