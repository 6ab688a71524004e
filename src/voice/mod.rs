//! Voice processing module
//!
//! Handles speech capture (wake phrase gating and turn-taking), recognizer
//! devices, speech synthesis and playback.

mod capture;
mod device;
mod playback;
mod tts;
mod wake_word;

pub use capture::{
    CaptureMode, CaptureOptions, Effect, Session, SpeechCaptureController, StartGate, TimerToken,
    Turn,
};
pub use device::{
    ConsoleDevice, DeviceErrorKind, DeviceSignal, RecognizerProcess, Segment, SpeechCapability,
    SpeechDevice, UtteranceEvent, console_signal, parse_recognizer_line,
};
#[cfg(feature = "speaker")]
pub use playback::SpeakerSink;
pub use playback::{AudioAsset, AudioSink, DecodedAudio, FileSink, NullSink, Playback};
pub use tts::SpeechSynthesis;
pub use wake_word::{DEFAULT_WAKE_PHRASE, WakePhrase};
