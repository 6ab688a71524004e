//! TOML configuration file loading
//!
//! Supports `~/.config/lumina/spark/config.toml` as a persistent config source.
//! All fields are optional, the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LuminaConfigFile {
    /// Answer service configuration
    #[serde(default)]
    pub api: ApiFileConfig,

    /// Wake phrase and turn-taking configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Speech recognizer configuration
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Audio output configuration
    #[serde(default)]
    pub audio: AudioFileConfig,

    /// Number of question/answer pairs kept in history
    pub history_limit: Option<usize>,
}

/// Answer service configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiFileConfig {
    /// Base URL of the answer service (e.g. `http://localhost:9002`)
    pub base_url: Option<String>,

    /// Path of the streamed answer endpoint
    pub stream_path: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: Option<u64>,
}

/// Wake phrase and turn-taking configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Wake phrase (e.g. "hey agile")
    pub wake_phrase: Option<String>,

    /// Require the wake phrase before capturing a question
    pub wake_phrase_enabled: Option<bool>,

    /// Seconds to wait for the wake phrase
    pub wake_timeout_secs: Option<u64>,

    /// Request streamed answers
    pub streaming: Option<bool>,

    /// Recognition language code (e.g. "en-US")
    pub language: Option<String>,
}

/// Speech recognizer configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// "auto", "console", "command" or "disabled"
    pub backend: Option<String>,

    /// External recognizer command line (program followed by arguments)
    pub command: Option<Vec<String>>,
}

/// Audio output configuration
#[derive(Debug, Default, Deserialize)]
pub struct AudioFileConfig {
    /// "file", "speaker" or "disabled"
    pub output: Option<String>,

    /// Directory for synthesized audio files
    pub dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `LuminaConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> LuminaConfigFile {
    let Some(path) = config_file_path() else {
        return LuminaConfigFile::default();
    };

    if !path.exists() {
        return LuminaConfigFile::default();
    }

    match load_config_file_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            LuminaConfigFile::default()
        }
    }
}

/// Load a TOML config file from an explicit path
///
/// # Errors
///
/// Returns error if the file cannot be read or parsed
pub fn load_config_file_from(path: &Path) -> Result<LuminaConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::info!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Return the config file path: `~/.config/lumina/spark/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("lumina")
            .join("spark")
            .join("config.toml")
    })
}
