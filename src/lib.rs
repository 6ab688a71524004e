//! Lumina Spark - wake phrase activated voice assistant
//!
//! This library provides the core functionality for the assistant:
//! - Speech capture gated by a wake phrase, turning speech into questions
//! - Answer and speech synthesis clients for the generative AI service
//! - Chat history, language selection and audio playback
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Speech device (console / process)       │
//! └────────────────────┬────────────────────────────────┘
//!                      │ utterances, end of speech, errors
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Daemon                            │
//! │   Capture controller │ Assistant │ History │ Audio   │
//! └────────────────────┬────────────────────────────────┘
//!                      │ POST /api/gen-ai
//! ┌────────────────────▼────────────────────────────────┐
//! │             Answer service                           │
//! │   answer │ stream │ text-to-speech │ health          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod answer;
pub mod assistant;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod history;
pub mod language;
pub mod notify;
pub mod voice;

pub use answer::{AnswerService, GenAiClient};
pub use assistant::{Assistant, TurnOutcome, TurnTracker};
pub use config::Config;
pub use daemon::{Daemon, Services, UserCommand};
pub use error::{Error, Result};
pub use health::{BackendStatus, HealthClient};
pub use history::{ChatHistory, QaPair};
pub use language::Language;
pub use notify::Notification;
