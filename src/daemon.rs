//! Daemon - the interactive voice session
//!
//! Single-threaded event loop wiring user commands, speech device signals,
//! the wake timeout and answer task updates to the capture controller,
//! the assistant, history and playback. The loop is the only owner of
//! session state; network work runs in spawned tasks that report back over
//! a channel.

use std::collections::VecDeque;
use std::io::Write as _;
use std::ops::ControlFlow;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::assistant::{Assistant, TurnOutcome, TurnTracker};
use crate::health::{BackendStatus, HealthClient};
use crate::history::ChatHistory;
use crate::language::{LANGUAGES, Language};
use crate::notify::Notification;
use crate::voice::{
    AudioSink, CaptureMode, CaptureOptions, ConsoleDevice, DeviceErrorKind, DeviceSignal, Effect,
    Playback, RecognizerProcess, Session, SpeechCaptureController, SpeechCapability, SpeechDevice,
    StartGate, TimerToken, Turn, WakePhrase, console_signal,
};
use crate::config::MAX_WAKE_TIMEOUT;
use crate::{Config, Error, Result};

/// Interactive command typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    /// Start listening
    Start,
    /// Stop listening, or cancel the pending answer
    Stop,
    /// Switch recognition language
    Language(String),
    /// Show the chat history
    History,
    /// Replay the audio of a history entry (1 = newest)
    Replay(usize),
    /// Re-check the backend
    Health,
    /// List commands
    Help,
    /// Leave the session
    Quit,
}

impl FromStr for UserCommand {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);
        let (name, arg) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(name, arg)| (name, arg.trim()));

        match name.to_lowercase().as_str() {
            "start" | "listen" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "lang" | "language" if !arg.is_empty() => Ok(Self::Language(arg.to_string())),
            "lang" | "language" => Err(Error::Config("usage: /lang CODE".to_string())),
            "history" => Ok(Self::History),
            "replay" => arg
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(Self::Replay)
                .ok_or_else(|| Error::Config("usage: /replay N (1 = newest)".to_string())),
            "health" => Ok(Self::Health),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(Error::Config(format!("unknown command: /{other}"))),
        }
    }
}

const HELP: &str = "\
/start        listen for the wake phrase (or the question)
/stop         stop listening, or cancel the pending answer
/lang CODE    switch language (en-US, hi-IN, ta-IN, te-IN)
/history      show recent questions and answers
/replay N     replay the audio of answer N (1 = newest)
/health       re-check the answer service
/help         show this help
/quit         leave";

/// Update reported by a background task
#[derive(Debug)]
pub enum TaskUpdate {
    /// A streamed answer fragment
    Chunk { generation: u64, text: String },
    /// The turn finished
    Answered {
        generation: u64,
        result: Result<TurnOutcome>,
    },
    /// A health check finished
    Health(BackendStatus),
}

/// Something for the user to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    Notice(Notification),
    Mode(CaptureMode),
    Interim(String),
    Question(String),
    AnswerChunk(String),
    /// A complete answer; `streamed` if its text was already shown in chunks
    Answer { text: String, streamed: bool },
    Text(String),
}

/// Services the session depends on
pub struct Services {
    pub assistant: Assistant,
    pub health: HealthClient,
    pub sink: Arc<dyn AudioSink>,
}

/// The interactive session
pub struct Daemon {
    controller: SpeechCaptureController,
    session: Session,
    device: Box<dyn SpeechDevice>,
    console: Option<Arc<AtomicBool>>,
    assistant: Assistant,
    health: HealthClient,
    backend: BackendStatus,
    tracker: TurnTracker,
    history: ChatHistory,
    playback: Playback,
    language: String,
    deadline: Option<(TimerToken, Instant)>,
    shown_mode: CaptureMode,
    output: Vec<Output>,
    signals_tx: mpsc::UnboundedSender<DeviceSignal>,
    signals_rx: mpsc::UnboundedReceiver<DeviceSignal>,
    updates_tx: mpsc::UnboundedSender<TaskUpdate>,
    updates_rx: mpsc::UnboundedReceiver<TaskUpdate>,
}

impl Daemon {
    /// Create a session for `capability`
    ///
    /// The backend is assumed ready until the first health check says
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the wake phrase is invalid or the recognizer cannot
    /// be set up
    pub fn new(config: &Config, capability: SpeechCapability, services: Services) -> Result<Self> {
        let wake_phrase = if config.voice.wake_phrase_enabled {
            Some(WakePhrase::new(&config.voice.wake_phrase)?)
        } else {
            None
        };
        let options = CaptureOptions {
            wake_phrase,
            wake_timeout: config.voice.wake_timeout,
        };

        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        let (device, console) = match &capability {
            SpeechCapability::VendorPrefixed(command) => {
                let device = RecognizerProcess::new(command.clone(), signals_tx.clone())?;
                (Box::new(device) as Box<dyn SpeechDevice>, None)
            }
            SpeechCapability::Native | SpeechCapability::Unavailable => {
                let device = ConsoleDevice::new();
                let flag = device.listening_flag();
                (Box::new(device) as Box<dyn SpeechDevice>, Some(flag))
            }
        };

        Ok(Self {
            controller: SpeechCaptureController::new(options, capability),
            session: Session::new(),
            device,
            console,
            assistant: services.assistant,
            health: services.health,
            backend: BackendStatus::Ready,
            tracker: TurnTracker::new(),
            history: ChatHistory::new(config.history_limit),
            playback: Playback::new(services.sink),
            language: config.voice.language.clone(),
            deadline: None,
            shown_mode: CaptureMode::Idle,
            output: Vec::new(),
            signals_tx,
            signals_rx,
            updates_tx,
            updates_rx,
        })
    }

    /// Replace the speech device
    #[must_use]
    pub fn with_device(mut self, device: Box<dyn SpeechDevice>) -> Self {
        self.device = device;
        self.console = None;
        self
    }

    /// Sender for feeding device signals into the session
    #[must_use]
    pub fn signal_sender(&self) -> mpsc::UnboundedSender<DeviceSignal> {
        self.signals_tx.clone()
    }

    /// Current capture mode
    #[must_use]
    pub const fn mode(&self) -> CaptureMode {
        self.session.mode()
    }

    /// Armed wake timeout, if any
    #[must_use]
    pub const fn next_deadline(&self) -> Option<(TimerToken, Instant)> {
        self.deadline
    }

    /// Whether an answer is being fetched
    #[must_use]
    pub const fn answer_pending(&self) -> bool {
        self.tracker.is_pending()
    }

    #[must_use]
    pub const fn history(&self) -> &ChatHistory {
        &self.history
    }

    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    #[must_use]
    pub const fn backend(&self) -> &BackendStatus {
        &self.backend
    }

    /// Take everything produced for the user since the last call
    pub fn take_output(&mut self) -> Vec<Output> {
        std::mem::take(&mut self.output)
    }

    /// Wait for the next background task update
    pub async fn next_update(&mut self) -> Option<TaskUpdate> {
        self.updates_rx.recv().await
    }

    /// Handle a typed command
    pub fn handle_command(&mut self, command: UserCommand) -> ControlFlow<()> {
        tracing::debug!(?command, mode = %self.session.mode(), "user command");

        match command {
            UserCommand::Start => {
                let gate = StartGate {
                    answer_pending: self.tracker.is_pending(),
                    backend: self.backend.clone(),
                };
                if gate.answer_pending {
                    self.notify(Notification::info(
                        "Busy",
                        "Still answering the last question.",
                    ));
                }
                let effects = self.controller.start(&mut self.session, &gate);
                self.apply(effects);
            }
            UserCommand::Stop => {
                if self.session.mode() == CaptureMode::Idle {
                    if let Some(generation) = self.tracker.supersede() {
                        tracing::info!(generation, "pending answer superseded");
                        self.notify(Notification::info("Cancelled", "Answer discarded."));
                    }
                    self.playback.stop();
                } else {
                    let effects = self.controller.stop(&mut self.session);
                    self.apply(effects);
                }
            }
            UserCommand::Language(code) => match Language::by_code(&code) {
                Some(language) => {
                    self.language = language.code.to_string();
                    tracing::info!(language = language.code, "language changed");
                    self.notify(Notification::info(
                        "Language",
                        format!("Now using {language}."),
                    ));
                }
                None => self.notify(Notification::from_error(
                    "Language",
                    &Error::Config(format!("unsupported language: {code}")),
                )),
            },
            UserCommand::History => self.show_history(),
            UserCommand::Replay(n) => self.replay(n),
            UserCommand::Health => self.spawn_health_check(),
            UserCommand::Help => self.output.push(Output::Text(HELP.to_string())),
            UserCommand::Quit => return ControlFlow::Break(()),
        }

        self.note_mode();
        ControlFlow::Continue(())
    }

    /// Parse and handle a typed command line
    pub fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        match line.parse() {
            Ok(command) => self.handle_command(command),
            Err(e) => {
                self.notify(Notification::from_error("Command", &e));
                ControlFlow::Continue(())
            }
        }
    }

    /// Handle a signal from the speech device
    pub fn handle_signal(&mut self, signal: DeviceSignal) {
        let effects = match signal {
            DeviceSignal::Utterance(event) => self.controller.on_utterance(&mut self.session, &event),
            DeviceSignal::EndOfSpeech => self.controller.on_end_of_speech(&mut self.session),
            DeviceSignal::Error(kind) => self.controller.on_device_error(&mut self.session, &kind),
        };
        self.apply(effects);
        self.note_mode();
    }

    /// The wake timeout armed with `token` expired
    pub fn handle_timeout(&mut self, token: TimerToken) {
        if self.deadline.is_some_and(|(armed, _)| armed == token) {
            self.deadline = None;
        }
        let effects = self.controller.on_wake_timeout(&mut self.session, token);
        if !effects.is_empty() {
            self.notify(Notification::info(
                "Wake phrase not heard",
                "Stopped listening.",
            ));
        }
        self.apply(effects);
        self.note_mode();
    }

    /// Apply a background task update
    pub fn apply_update(&mut self, update: TaskUpdate) {
        match update {
            TaskUpdate::Chunk { generation, text } => {
                if self.tracker.is_current(generation) {
                    self.output.push(Output::AnswerChunk(text));
                }
            }
            TaskUpdate::Answered { generation, result } => {
                if !self.tracker.finish(generation) {
                    tracing::debug!(generation, "discarding superseded answer");
                    return;
                }
                match result {
                    Ok(outcome) => self.record(outcome),
                    Err(e) => {
                        tracing::error!(generation, error = %e, "turn failed");
                        self.notify(Notification::from_error("Answer Error", &e));
                    }
                }
            }
            TaskUpdate::Health(status) => {
                tracing::info!(%status, "backend status");
                if let BackendStatus::Misconfigured(reason) = &status {
                    self.notify(Notification::from_error(
                        "Configuration Error",
                        &Error::Config(reason.clone()),
                    ));
                } else if !self.backend.is_ready() {
                    self.notify(Notification::info("Backend", "Answer service is ready."));
                }
                self.backend = status;
            }
        }
    }

    /// Run until the user quits or the process is interrupted
    ///
    /// # Errors
    ///
    /// Returns error if the session cannot be driven further
    pub async fn run(mut self) -> Result<()> {
        let (lines_tx, mut lines) = mpsc::unbounded_channel();
        spawn_console_reader(self.console.clone(), lines_tx, self.signals_tx.clone());

        let status = self.health.check().await;
        self.apply_update(TaskUpdate::Health(status));
        self.output.push(Output::Text(
            "Type /start to begin, /help for commands.".to_string(),
        ));

        tracing::info!(language = %self.language, "session running");

        loop {
            self.render();
            let deadline = self.deadline;

            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        if self.handle_line(&line).is_break() {
                            break;
                        }
                    }
                    None => break,
                },
                Some(signal) = self.signals_rx.recv() => self.handle_signal(signal),
                Some(update) = self.updates_rx.recv() => self.apply_update(update),
                () = wake_deadline(deadline.map(|(_, at)| at)) => {
                    if let Some((token, _)) = deadline {
                        self.handle_timeout(token);
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupted");
                    break;
                }
            }
        }

        self.device.stop();
        self.playback.stop();
        self.render();
        tracing::info!("session ended");
        Ok(())
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue = VecDeque::from(effects);

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::StartDevice => queue.extend(self.start_device()),
                Effect::StopDevice => self.device.stop(),
                Effect::RestartDevice => {
                    self.device.stop();
                    queue.extend(self.start_device());
                }
                Effect::ArmWakeTimeout { token, after } => {
                    if self.session.wake_timeout() == Some(token) {
                        let now = Instant::now();
                        let at = now.checked_add(after).unwrap_or(now + MAX_WAKE_TIMEOUT);
                        self.deadline = Some((token, at));
                    }
                }
                Effect::CancelWakeTimeout(token) => {
                    if self.deadline.is_some_and(|(armed, _)| armed == token) {
                        self.deadline = None;
                    }
                }
                Effect::Interim(text) => {
                    if !text.is_empty() {
                        self.output.push(Output::Interim(text));
                    }
                }
                Effect::EmitTurn(turn) => self.submit(turn),
                Effect::Notify(notification) => self.notify(notification),
            }
        }
    }

    fn start_device(&mut self) -> Vec<Effect> {
        match self.device.start(&self.language) {
            Ok(()) => Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "failed to start speech device");
                self.controller
                    .on_device_error(&mut self.session, &DeviceErrorKind::AudioCapture)
            }
        }
    }

    fn submit(&mut self, turn: Turn) {
        let Some(generation) = self.tracker.begin() else {
            tracing::warn!(turn = %turn.id, "turn dropped, answer already pending");
            return;
        };

        tracing::info!(turn = %turn.id, generation, "submitting question");
        self.output.push(Output::Question(turn.text.clone()));

        let assistant = self.assistant.clone();
        let language = self.language.clone();
        let updates = self.updates_tx.clone();
        tokio::spawn(async move {
            let chunks = updates.clone();
            let result = assistant
                .answer_turn(&turn.text, &language, move |text| {
                    let _ = chunks.send(TaskUpdate::Chunk {
                        generation,
                        text: text.to_string(),
                    });
                })
                .await;
            let _ = updates.send(TaskUpdate::Answered { generation, result });
        });
    }

    fn record(&mut self, mut outcome: TurnOutcome) {
        if let Some(e) = outcome.stream_error.take() {
            self.notify(Notification::from_error("Answer Interrupted", &e));
        }
        if let Some(e) = outcome.synthesis_error.take() {
            self.notify(Notification::from_error("Speech Synthesis Error", &e));
        }

        self.output.push(Output::Answer {
            text: outcome.answer.clone(),
            streamed: self.assistant.is_streaming(),
        });

        if let Some(audio) = outcome.audio.clone() {
            self.playback.play(audio);
        }
        self.history.push(outcome.into_pair());
    }

    fn show_history(&mut self) {
        if self.history.is_empty() {
            self.output.push(Output::Text("No questions yet.".to_string()));
            return;
        }

        let text = self
            .history
            .iter()
            .enumerate()
            .map(|(i, pair)| {
                format!(
                    "{}. [{}] Q: {}\n   A: {}{}{}",
                    i + 1,
                    pair.asked_at.format("%H:%M:%S"),
                    pair.question,
                    pair.answer,
                    if pair.interrupted { " (interrupted)" } else { "" },
                    if pair.audio.is_some() { " [audio]" } else { "" },
                )
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.output.push(Output::Text(text));
    }

    fn replay(&mut self, n: usize) {
        let audio = self
            .history
            .get(n.saturating_sub(1))
            .map(|pair| pair.audio.clone());

        match audio {
            Some(Some(audio)) => {
                tracing::debug!(entry = n, "replaying answer audio");
                self.playback.play(audio);
            }
            Some(None) => self.notify(Notification::info("Replay", "That answer has no audio.")),
            None => self.notify(Notification::error(
                "Replay",
                format!("No history entry {n}."),
            )),
        }
    }

    fn spawn_health_check(&self) {
        let health = self.health.clone();
        let updates = self.updates_tx.clone();
        tokio::spawn(async move {
            let status = health.check().await;
            let _ = updates.send(TaskUpdate::Health(status));
        });
    }

    fn notify(&mut self, notification: Notification) {
        self.output.push(Output::Notice(notification));
    }

    fn note_mode(&mut self) {
        let mode = self.session.mode();
        if mode != self.shown_mode {
            self.shown_mode = mode;
            self.output.push(Output::Mode(mode));
        }
    }

    fn render(&mut self) {
        let mut stdout = std::io::stdout().lock();
        for output in self.take_output() {
            match output {
                Output::Notice(notification) => notification.emit(),
                Output::Mode(mode) => {
                    let _ = writeln!(stdout, "-- {mode} --");
                }
                Output::Interim(text) => {
                    let _ = writeln!(stdout, "  ... {text}");
                }
                Output::Question(text) => {
                    let _ = writeln!(stdout, "Q: {text}");
                    let _ = write!(stdout, "A: ");
                }
                Output::AnswerChunk(text) => {
                    let _ = write!(stdout, "{text}");
                }
                Output::Answer { text, streamed } => {
                    if streamed {
                        let _ = writeln!(stdout);
                    } else {
                        let _ = writeln!(stdout, "{text}");
                    }
                }
                Output::Text(text) => {
                    let _ = writeln!(stdout, "{text}");
                }
            }
        }
        let _ = stdout.flush();
    }
}

/// List supported languages, one per line
#[must_use]
pub fn language_list() -> String {
    LANGUAGES
        .iter()
        .map(|l| format!("{:<6} {} ({}) -> tts {}", l.code, l.name, l.local_name, l.tts_code))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn wake_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Read stdin: `/` lines are commands, other lines are console speech while
/// the console recognizer is listening
fn spawn_console_reader(
    listening: Option<Arc<AtomicBool>>,
    lines: mpsc::UnboundedSender<String>,
    signals: mpsc::UnboundedSender<DeviceSignal>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) if line.trim_start().starts_with('/') => {
                    if lines.send(line).is_err() {
                        break;
                    }
                }
                Ok(Some(line)) => {
                    let accepted = listening
                        .as_ref()
                        .is_some_and(|flag| flag.load(Ordering::SeqCst));
                    if accepted {
                        let _ = signals.send(console_signal(&line));
                    } else if !line.trim().is_empty() {
                        tracing::debug!("typed text ignored, not listening (try /start)");
                    }
                }
                Ok(None) => {
                    let _ = lines.send("/quit".to_string());
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    let _ = lines.send("/quit".to_string());
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("/start".parse::<UserCommand>().unwrap(), UserCommand::Start);
        assert_eq!(" /STOP ".parse::<UserCommand>().unwrap(), UserCommand::Stop);
        assert_eq!(
            "/lang hi-IN".parse::<UserCommand>().unwrap(),
            UserCommand::Language("hi-IN".to_string())
        );
        assert_eq!("/replay 2".parse::<UserCommand>().unwrap(), UserCommand::Replay(2));
        assert_eq!("/quit".parse::<UserCommand>().unwrap(), UserCommand::Quit);
    }

    #[test]
    fn test_parse_command_errors() {
        assert!("/lang".parse::<UserCommand>().is_err());
        assert!("/replay 0".parse::<UserCommand>().is_err());
        assert!("/replay x".parse::<UserCommand>().is_err());
        assert!("/dance".parse::<UserCommand>().is_err());
    }

    #[test]
    fn test_language_list_names_all() {
        let list = language_list();
        for code in ["en-US", "hi-IN", "ta-IN", "te-IN"] {
            assert!(list.contains(code));
        }
    }
}
