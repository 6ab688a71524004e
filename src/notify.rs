//! User-facing notifications
//!
//! Transient messages shown to the user. Every error that reaches the user
//! goes through here; none of them end the session.

use crate::Error;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    /// Informational
    Info,
    /// Something failed
    Error,
}

/// A transient message for the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: NotificationKind,
    pub title: String,
    pub description: String,
}

impl Notification {
    /// Informational notification
    #[must_use]
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Info,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Error notification
    #[must_use]
    pub fn error(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::Error,
            title: title.into(),
            description: description.into(),
        }
    }

    /// Error notification describing `err`
    #[must_use]
    pub fn from_error(title: impl Into<String>, err: &Error) -> Self {
        let description = match err {
            Error::Config(message) => message.clone(),
            Error::Device(kind) => kind.describe(),
            other => other.to_string(),
        };
        Self::error(title, description)
    }

    /// Whether this reports a failure
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.kind == NotificationKind::Error
    }

    /// Log the notification and print it to stderr
    pub fn emit(&self) {
        match self.kind {
            NotificationKind::Info => {
                tracing::info!(title = %self.title, description = %self.description, "notification");
            }
            NotificationKind::Error => {
                tracing::warn!(title = %self.title, description = %self.description, "notification");
            }
        }
        eprintln!("{self}");
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let marker = match self.kind {
            NotificationKind::Info => "i",
            NotificationKind::Error => "!",
        };
        write!(f, "[{marker}] {}: {}", self.title, self.description)
    }
}
