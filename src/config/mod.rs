//! Configuration management for Lumina Spark
//!
//! Values are layered: built-in defaults, then the TOML config file, then
//! `LUMINA_*` environment variables. CLI flags are applied on top by the
//! binary.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::language::Language;
use crate::voice::DEFAULT_WAKE_PHRASE;
use crate::{Error, Result};

pub use file::{LuminaConfigFile, config_file_path, load_config_file, load_config_file_from};

/// Default answer service base URL
pub const DEFAULT_API_URL: &str = "http://localhost:9002";

/// Default path of the streamed answer endpoint
pub const DEFAULT_STREAM_PATH: &str = "/api/gen-ai/stream";

/// Default wait for the wake phrase
pub const DEFAULT_WAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest accepted wait for the wake phrase
pub const MAX_WAKE_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Default number of history entries
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Lumina Spark configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Answer service configuration
    pub api: ApiConfig,

    /// Wake phrase and turn-taking configuration
    pub voice: VoiceConfig,

    /// Speech recognizer configuration
    pub speech: SpeechConfig,

    /// Where synthesized audio goes
    pub audio: AudioOutput,

    /// Number of question/answer pairs kept in history
    pub history_limit: usize,

    /// Path to data directory (synthesized audio)
    pub data_dir: PathBuf,
}

/// Answer service configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the answer service
    pub base_url: Url,

    /// Path of the streamed answer endpoint
    pub stream_path: String,

    /// Timeout applied to every request
    pub request_timeout: Duration,
}

/// Wake phrase and turn-taking configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Wake phrase that must be heard before a question is captured
    pub wake_phrase: String,

    /// Require the wake phrase (otherwise `start` captures immediately)
    pub wake_phrase_enabled: bool,

    /// How long to wait for the wake phrase
    pub wake_timeout: Duration,

    /// Request streamed answers
    pub streaming_enabled: bool,

    /// Recognition language code
    pub language: String,
}

/// Which speech recognizer backs the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechBackend {
    /// External recognizer if configured and installed, else the console
    Auto,
    /// Typed transcript lines on stdin
    Console,
    /// External recognizer process
    Command,
    /// No recognizer
    Disabled,
}

impl FromStr for SpeechBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "console" => Ok(Self::Console),
            "command" => Ok(Self::Command),
            "disabled" | "none" => Ok(Self::Disabled),
            other => Err(Error::Config(format!("unknown speech backend: {other}"))),
        }
    }
}

/// Speech recognizer configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Selected backend
    pub backend: SpeechBackend,

    /// External recognizer command line
    pub command: Vec<String>,
}

/// Destination for synthesized audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioOutput {
    /// Write each answer to a file in this directory
    File(PathBuf),
    /// Play through the default output device
    Speaker,
    /// Keep audio in history only
    Disabled,
}

/// Return the data directory, e.g. `~/.local/share/spark` on Linux
#[must_use]
pub fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "lumina", "spark")
        .map_or_else(|| PathBuf::from(".lumina"), |d| d.data_dir().to_path_buf())
}

impl Config {
    /// Load configuration from the config file and environment
    ///
    /// An explicit `path` must exist; the default path is optional.
    ///
    /// # Errors
    ///
    /// Returns error if the explicit file cannot be read or a value is invalid
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => load_config_file_from(path)?,
            None => load_config_file(),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge a parsed config file with environment values
    ///
    /// # Errors
    ///
    /// Returns error if a value is invalid
    pub fn resolve(fc: LuminaConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let base_url = env("LUMINA_API_URL")
            .or(fc.api.base_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let base_url = Url::parse(&base_url)?;

        let stream_path = env("LUMINA_STREAM_PATH")
            .or(fc.api.stream_path)
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());

        let request_timeout = fc
            .api
            .timeout_secs
            .map_or(DEFAULT_REQUEST_TIMEOUT, Duration::from_secs);

        let wake_phrase = env("LUMINA_WAKE_PHRASE")
            .or(fc.voice.wake_phrase)
            .unwrap_or_else(|| DEFAULT_WAKE_PHRASE.to_string());
        if wake_phrase.trim().is_empty() {
            return Err(Error::Config("wake phrase must not be empty".to_string()));
        }

        let wake_phrase_enabled = match env("LUMINA_WAKE_PHRASE_ENABLED") {
            Some(value) => parse_bool("LUMINA_WAKE_PHRASE_ENABLED", &value)?,
            None => fc.voice.wake_phrase_enabled.unwrap_or(true),
        };

        let wake_timeout = match env("LUMINA_WAKE_TIMEOUT_SECS") {
            Some(value) => value.trim().parse::<u64>().map_err(|_| {
                Error::Config(format!("LUMINA_WAKE_TIMEOUT_SECS is not a number: {value}"))
            })?,
            None => fc
                .voice
                .wake_timeout_secs
                .unwrap_or(DEFAULT_WAKE_TIMEOUT.as_secs()),
        };
        if wake_timeout == 0 {
            return Err(Error::Config("wake timeout must be at least one second".to_string()));
        }
        if wake_timeout > MAX_WAKE_TIMEOUT.as_secs() {
            return Err(Error::Config(format!(
                "wake timeout must be at most {} seconds",
                MAX_WAKE_TIMEOUT.as_secs()
            )));
        }

        let streaming_enabled = match env("LUMINA_STREAMING") {
            Some(value) => parse_bool("LUMINA_STREAMING", &value)?,
            None => fc.voice.streaming.unwrap_or(false),
        };

        let language = env("LUMINA_LANGUAGE")
            .or(fc.voice.language)
            .unwrap_or_else(|| Language::DEFAULT_CODE.to_string());
        if Language::by_code(&language).is_none() {
            return Err(Error::Config(format!("unsupported language: {language}")));
        }

        let backend = env("LUMINA_SPEECH_BACKEND")
            .or(fc.speech.backend)
            .map_or(Ok(SpeechBackend::Auto), |b| b.parse())?;
        let command = fc.speech.command.unwrap_or_default();
        if backend == SpeechBackend::Command && command.is_empty() {
            return Err(Error::Config(
                "speech backend \"command\" requires speech.command".to_string(),
            ));
        }

        let data_dir = data_dir();
        let audio_dir = env("LUMINA_AUDIO_DIR")
            .or(fc.audio.dir)
            .map_or_else(|| data_dir.join("audio"), PathBuf::from);
        let audio = match fc.audio.output.as_deref().map(str::trim) {
            None | Some("file") => AudioOutput::File(audio_dir),
            Some("speaker") => AudioOutput::Speaker,
            Some("disabled" | "none") => AudioOutput::Disabled,
            Some(other) => {
                return Err(Error::Config(format!("unknown audio output: {other}")));
            }
        };

        let history_limit = fc.history_limit.unwrap_or(DEFAULT_HISTORY_LIMIT).max(1);

        Ok(Self {
            api: ApiConfig {
                base_url,
                stream_path,
                request_timeout,
            },
            voice: VoiceConfig {
                wake_phrase,
                wake_phrase_enabled,
                wake_timeout: Duration::from_secs(wake_timeout),
                streaming_enabled,
                language,
            },
            speech: SpeechConfig { backend, command },
            audio,
            history_limit,
            data_dir,
        })
    }

    /// Override the answer service base URL
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid
    pub fn set_api_url(&mut self, url: &str) -> Result<()> {
        self.api.base_url = Url::parse(url)?;
        Ok(())
    }

    /// Override the recognition language
    ///
    /// # Errors
    ///
    /// Returns error if the language is not supported
    pub fn set_language(&mut self, code: &str) -> Result<()> {
        let language = Language::by_code(code)
            .ok_or_else(|| Error::Config(format!("unsupported language: {code}")))?;
        self.voice.language = language.code.to_string();
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean, got {value}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::resolve(LuminaConfigFile::default(), env_from(&[])).unwrap();

        assert_eq!(config.api.base_url.as_str(), "http://localhost:9002/");
        assert_eq!(config.api.stream_path, DEFAULT_STREAM_PATH);
        assert_eq!(config.voice.wake_phrase, "hey agile");
        assert!(config.voice.wake_phrase_enabled);
        assert_eq!(config.voice.wake_timeout, Duration::from_secs(15));
        assert!(!config.voice.streaming_enabled);
        assert_eq!(config.voice.language, "en-US");
        assert_eq!(config.speech.backend, SpeechBackend::Auto);
        assert_eq!(config.history_limit, 5);
        assert!(matches!(config.audio, AudioOutput::File(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: LuminaConfigFile = toml::from_str(
            r#"
            [api]
            base_url = "http://file.test"

            [voice]
            wake_phrase = "ok lumina"
            streaming = false
            "#,
        )
        .unwrap();

        let config = Config::resolve(
            file,
            env_from(&[
                ("LUMINA_API_URL", "http://env.test"),
                ("LUMINA_STREAMING", "yes"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api.base_url.host_str(), Some("env.test"));
        assert_eq!(config.voice.wake_phrase, "ok lumina");
        assert!(config.voice.streaming_enabled);
    }

    #[test]
    fn test_invalid_values() {
        let bad_url = Config::resolve(
            LuminaConfigFile::default(),
            env_from(&[("LUMINA_API_URL", "not a url")]),
        );
        assert!(matches!(bad_url, Err(Error::Url(_))));

        let bad_language = Config::resolve(
            LuminaConfigFile::default(),
            env_from(&[("LUMINA_LANGUAGE", "xx-XX")]),
        );
        assert!(matches!(bad_language, Err(Error::Config(_))));

        let zero_timeout = Config::resolve(
            LuminaConfigFile::default(),
            env_from(&[("LUMINA_WAKE_TIMEOUT_SECS", "0")]),
        );
        assert!(matches!(zero_timeout, Err(Error::Config(_))));

        for secs in ["3601", "18446744073709551615"] {
            let huge_timeout = Config::resolve(
                LuminaConfigFile::default(),
                env_from(&[("LUMINA_WAKE_TIMEOUT_SECS", secs)]),
            );
            assert!(matches!(huge_timeout, Err(Error::Config(_))), "{secs}");
        }

        let hour = Config::resolve(
            LuminaConfigFile::default(),
            env_from(&[("LUMINA_WAKE_TIMEOUT_SECS", "3600")]),
        )
        .unwrap();
        assert_eq!(hour.voice.wake_timeout, MAX_WAKE_TIMEOUT);

        let bad_bool = Config::resolve(
            LuminaConfigFile::default(),
            env_from(&[("LUMINA_STREAMING", "maybe")]),
        );
        assert!(matches!(bad_bool, Err(Error::Config(_))));
    }

    #[test]
    fn test_command_backend_requires_command() {
        let result = Config::resolve(
            LuminaConfigFile::default(),
            env_from(&[("LUMINA_SPEECH_BACKEND", "command")]),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_set_language() {
        let mut config = Config::resolve(LuminaConfigFile::default(), env_from(&[])).unwrap();
        config.set_language("ta-IN").unwrap();
        assert_eq!(config.voice.language, "ta-IN");
        assert!(config.set_language("fr-FR").is_err());
    }
}
