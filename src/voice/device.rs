//! Speech recognition devices
//!
//! A device turns speech into [`DeviceSignal`]s delivered over a channel.
//! Which device backs a session is decided once at startup by
//! [`SpeechCapability::detect`]:
//!
//! - `Native`: the built-in console recognizer (typed transcript lines)
//! - `VendorPrefixed`: an external recognizer process speaking JSON lines
//! - `Unavailable`: no recognizer, capture cannot start

use std::io::IsTerminal;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::{SpeechBackend, SpeechConfig};
use crate::{Error, Result};

/// One recognized piece of speech
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub is_final: bool,
}

impl Segment {
    /// A finalized segment
    #[must_use]
    pub fn final_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }

    /// An interim (still changing) segment
    #[must_use]
    pub fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }
}

/// A batch of segments delivered by the device, in recognition order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtteranceEvent {
    pub segments: Vec<Segment>,
}

impl UtteranceEvent {
    #[must_use]
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }
}

/// Error reported by a speech device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceErrorKind {
    /// Microphone permission denied
    NotAllowed,
    /// Recognition service refused to run
    ServiceNotAllowed,
    /// No audio input could be captured
    AudioCapture,
    /// Recognition service unreachable
    Network,
    /// Nothing was heard
    NoSpeech,
    /// Recognition was aborted
    Aborted,
    /// Anything else, by code
    Other(String),
}

impl DeviceErrorKind {
    /// Parse a recognizer error code (e.g. `not-allowed`, `no-speech`)
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        match code.trim() {
            "not-allowed" => Self::NotAllowed,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "audio-capture" => Self::AudioCapture,
            "network" => Self::Network,
            "no-speech" => Self::NoSpeech,
            "aborted" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Recognizer error code
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::NotAllowed => "not-allowed",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::AudioCapture => "audio-capture",
            Self::Network => "network",
            Self::NoSpeech => "no-speech",
            Self::Aborted => "aborted",
            Self::Other(code) => code,
        }
    }

    /// Fatal errors end the session; transient ones are ignored
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::NoSpeech | Self::Aborted)
    }

    /// Human readable description
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::NotAllowed => "Microphone access was denied.".to_string(),
            other => format!("An error occurred: {}", other.code()),
        }
    }
}

impl std::fmt::Display for DeviceErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Signal emitted by a speech device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSignal {
    /// Recognition results
    Utterance(UtteranceEvent),
    /// The speaker went silent or the device stopped on its own
    EndOfSpeech,
    /// The device failed
    Error(DeviceErrorKind),
}

/// Controls a speech recognizer
pub trait SpeechDevice: Send {
    /// Start recognizing in the given language
    ///
    /// # Errors
    ///
    /// Returns error if the recognizer cannot be started
    fn start(&mut self, language: &str) -> Result<()>;

    /// Stop recognizing; pending results may still arrive
    fn stop(&mut self);
}

/// Recognizer available to this process, selected once at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechCapability {
    /// Built-in console recognizer
    Native,
    /// External recognizer process (program, arguments)
    VendorPrefixed(Vec<String>),
    /// No recognizer available
    Unavailable,
}

impl SpeechCapability {
    /// Detect the recognizer for this configuration
    #[must_use]
    pub fn detect(config: &SpeechConfig) -> Self {
        let external = || {
            let program = config.command.first()?;
            match which::which(program) {
                Ok(path) => {
                    tracing::debug!(path = %path.display(), "external recognizer found");
                    Some(Self::VendorPrefixed(config.command.clone()))
                }
                Err(e) => {
                    tracing::warn!(program, error = %e, "external recognizer not found");
                    None
                }
            }
        };

        let capability = match config.backend {
            SpeechBackend::Disabled => Self::Unavailable,
            SpeechBackend::Console => Self::Native,
            SpeechBackend::Command => external().unwrap_or(Self::Unavailable),
            SpeechBackend::Auto => external().unwrap_or_else(|| {
                if std::io::stdin().is_terminal() {
                    Self::Native
                } else {
                    Self::Unavailable
                }
            }),
        };

        tracing::info!(?capability, "speech capability selected");
        capability
    }

    /// Whether capture can start at all
    #[must_use]
    pub const fn is_available(&self) -> bool {
        !matches!(self, Self::Unavailable)
    }
}

/// Console recognizer: typed lines are treated as recognized speech
///
/// The line reader lives in the daemon; this only gates whether lines are
/// forwarded as device signals.
#[derive(Debug, Clone, Default)]
pub struct ConsoleDevice {
    listening: Arc<AtomicBool>,
}

impl ConsoleDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether typed speech is currently accepted
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Shared handle for the line reader
    #[must_use]
    pub fn listening_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.listening)
    }
}

impl SpeechDevice for ConsoleDevice {
    fn start(&mut self, language: &str) -> Result<()> {
        self.listening.store(true, Ordering::SeqCst);
        tracing::debug!(language, "console recognizer listening");
        Ok(())
    }

    fn stop(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
        tracing::debug!("console recognizer stopped");
    }
}

/// Map a typed console line to a device signal
///
/// An empty line ends the utterance, `~text` is an interim result, anything
/// else is a final result.
#[must_use]
pub fn console_signal(line: &str) -> DeviceSignal {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return DeviceSignal::EndOfSpeech;
    }

    let segment = line
        .strip_prefix('~')
        .map_or_else(|| Segment::final_text(line), Segment::interim);
    DeviceSignal::Utterance(UtteranceEvent::new(vec![segment]))
}

/// JSON line emitted by an external recognizer
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum RecognizerMessage {
    Result { segments: Vec<RecognizerSegment> },
    End,
    Error { error: String },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecognizerSegment {
    transcript: String,
    #[serde(default)]
    is_final: bool,
}

/// Parse one line of recognizer output
///
/// # Errors
///
/// Returns error if the line is not a recognizer message
pub fn parse_recognizer_line(line: &str) -> Result<DeviceSignal> {
    let message: RecognizerMessage = serde_json::from_str(line)?;
    Ok(match message {
        RecognizerMessage::Result { segments } => DeviceSignal::Utterance(UtteranceEvent::new(
            segments
                .into_iter()
                .map(|s| Segment {
                    text: s.transcript,
                    is_final: s.is_final,
                })
                .collect(),
        )),
        RecognizerMessage::End => DeviceSignal::EndOfSpeech,
        RecognizerMessage::Error { error } => DeviceSignal::Error(DeviceErrorKind::from_code(&error)),
    })
}

/// External recognizer process
///
/// The process is spawned on `start` with `LUMINA_LANGUAGE` set and killed
/// on `stop`. Its exit is reported as end of speech. Each start begins a new
/// run; output of earlier runs, including the exit of a killed process, is
/// dropped.
pub struct RecognizerProcess {
    command: Vec<String>,
    signals: mpsc::UnboundedSender<DeviceSignal>,
    child: Option<Child>,
    run: Arc<AtomicU64>,
}

impl RecognizerProcess {
    /// Create a recognizer for `command` (program followed by arguments)
    ///
    /// # Errors
    ///
    /// Returns error if the command is empty
    pub fn new(command: Vec<String>, signals: mpsc::UnboundedSender<DeviceSignal>) -> Result<Self> {
        if command.is_empty() {
            return Err(Error::Config("recognizer command is empty".to_string()));
        }

        Ok(Self {
            command,
            signals,
            child: None,
            run: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl SpeechDevice for RecognizerProcess {
    fn start(&mut self, language: &str) -> Result<()> {
        self.stop();

        let mut child = Command::new(&self.command[0])
            .args(&self.command[1..])
            .env("LUMINA_LANGUAGE", language)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Config("recognizer stdout unavailable".to_string()))?;

        let run_id = self.run.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.run);
        let signals = self.signals.clone();
        tokio::spawn(async move {
            let send = |signal: DeviceSignal| {
                if current.load(Ordering::SeqCst) != run_id {
                    tracing::trace!(run_id, ?signal, "dropping signal from stopped recognizer");
                    return false;
                }
                signals.send(signal).is_ok()
            };

            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => {}
                    Ok(Some(line)) => match parse_recognizer_line(&line) {
                        Ok(signal) => {
                            if !send(signal) {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, line, "unreadable recognizer output"),
                    },
                    Ok(None) => {
                        send(DeviceSignal::EndOfSpeech);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "recognizer output failed");
                        send(DeviceSignal::Error(DeviceErrorKind::AudioCapture));
                        break;
                    }
                }
            }
        });

        tracing::debug!(command = ?self.command, language, "recognizer started");
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        self.run.fetch_add(1, Ordering::SeqCst);
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "recognizer already exited");
            }
            tracing::debug!("recognizer stopped");
        }
    }
}
