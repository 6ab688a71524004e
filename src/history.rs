//! In-memory chat history
//!
//! Newest entries first, capped to a fixed number. Nothing is persisted.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::voice::AudioAsset;

/// One answered question
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QaPair {
    pub id: Uuid,
    pub asked_at: DateTime<Utc>,
    pub question: String,
    pub answer: String,
    pub audio: Option<AudioAsset>,
    /// The answer stream broke off; `answer` is partial
    pub interrupted: bool,
}

/// Capped list of question/answer pairs
#[derive(Debug, Clone)]
pub struct ChatHistory {
    limit: usize,
    entries: VecDeque<QaPair>,
}

impl ChatHistory {
    /// Create a history holding at most `limit` entries (at least one)
    #[must_use]
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            entries: VecDeque::with_capacity(limit),
        }
    }

    /// Add the newest entry, dropping the oldest beyond the limit
    pub fn push(&mut self, pair: QaPair) {
        self.entries.push_front(pair);
        self.entries.truncate(self.limit);
    }

    /// Entry by position, 0 being the newest
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&QaPair> {
        self.entries.get(index)
    }

    /// Entries, newest first
    #[must_use]
    pub fn iter(&self) -> impl Iterator<Item = &QaPair> {
        self.entries.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(question: &str) -> QaPair {
        QaPair {
            id: Uuid::new_v4(),
            asked_at: Utc::now(),
            question: question.to_string(),
            answer: format!("answer to {question}"),
            audio: None,
            interrupted: false,
        }
    }

    #[test]
    fn test_newest_first_and_capped() {
        let mut history = ChatHistory::new(5);
        for i in 0..7 {
            history.push(pair(&format!("q{i}")));
        }

        assert_eq!(history.len(), 5);
        let questions: Vec<_> = history.iter().map(|p| p.question.as_str()).collect();
        assert_eq!(questions, vec!["q6", "q5", "q4", "q3", "q2"]);
        assert_eq!(history.get(0).map(|p| p.question.as_str()), Some("q6"));
        assert!(history.get(5).is_none());
    }

    #[test]
    fn test_zero_limit_keeps_one() {
        let mut history = ChatHistory::new(0);
        history.push(pair("a"));
        history.push(pair("b"));
        assert_eq!(history.len(), 1);
        assert_eq!(history.get(0).map(|p| p.question.as_str()), Some("b"));
    }
}
