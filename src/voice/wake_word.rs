//! Wake phrase detection
//!
//! Matches the wake phrase against finalized transcript segments. Matching is
//! plain case-insensitive substring containment with no word-boundary check,
//! so "theyagilet" matches "hey agile".

use crate::{Error, Result};

/// Default wake phrase
pub const DEFAULT_WAKE_PHRASE: &str = "hey agile";

/// Detects the wake phrase in recognized text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakePhrase {
    phrase: String,
}

impl WakePhrase {
    /// Create a new wake phrase matcher
    ///
    /// The phrase is trimmed and lowercased one character at a time, the
    /// same way transcripts are compared against it.
    ///
    /// # Errors
    ///
    /// Returns error if the phrase is empty after trimming
    pub fn new(phrase: &str) -> Result<Self> {
        let normalized: String = phrase.trim().chars().flat_map(char::to_lowercase).collect();
        if normalized.is_empty() {
            return Err(Error::Config("wake phrase must not be empty".to_string()));
        }

        tracing::debug!(wake_phrase = %normalized, "wake phrase configured");
        Ok(Self { phrase: normalized })
    }

    /// The normalized phrase
    #[must_use]
    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    /// Check if a transcript segment contains the wake phrase
    #[must_use]
    pub fn matches(&self, segment: &str) -> bool {
        find_ignore_case(segment, &self.phrase).is_some()
    }

    /// Return the text following the first occurrence of the wake phrase
    ///
    /// Leading whitespace, commas and periods are stripped from the
    /// remainder. Returns `None` if the phrase does not occur.
    #[must_use]
    pub fn remainder<'a>(&self, segment: &'a str) -> Option<&'a str> {
        let (_, end) = find_ignore_case(segment, &self.phrase)?;
        Some(segment[end..].trim_start_matches(|c: char| c.is_whitespace() || c == ',' || c == '.'))
    }
}

/// Find `needle` (already lowercase) in `haystack`, ignoring case
///
/// Returns byte offsets into the original haystack, so the slice stays valid
/// even when lowercasing changes the byte length of a character.
fn find_ignore_case(haystack: &str, needle: &str) -> Option<(usize, usize)> {
    haystack.char_indices().find_map(|(start, _)| {
        let mut expected = needle.chars();
        let mut pending = expected.next();
        let mut end = start;

        for (offset, c) in haystack[start..].char_indices() {
            let Some(_) = pending else { break };
            for lower in c.to_lowercase() {
                match pending {
                    Some(want) if want == lower => pending = expected.next(),
                    _ => return None,
                }
            }
            end = start + offset + c.len_utf8();
        }

        pending.is_none().then_some((start, end))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phrase_normalization() {
        let wake = WakePhrase::new("  Hey AGILE ").unwrap();
        assert_eq!(wake.phrase(), "hey agile");
    }

    #[test]
    fn test_empty_phrase_rejected() {
        assert!(matches!(WakePhrase::new("   "), Err(Error::Config(_))));
    }

    #[test]
    fn test_case_insensitive_match() {
        let wake = WakePhrase::new("hey agile").unwrap();
        assert!(wake.matches("HEY AGILE what time is it"));
        assert!(wake.matches("  so, Hey Agile  "));
        assert!(!wake.matches("hello world"));
    }

    #[test]
    fn test_substring_false_positive_is_preserved() {
        let wake = WakePhrase::new("hey agile").unwrap();
        assert!(wake.matches("theyagilet"));
    }

    #[test]
    fn test_remainder() {
        let wake = WakePhrase::new("hey agile").unwrap();
        assert_eq!(
            wake.remainder("Hey Agile, what is photosynthesis?"),
            Some("what is photosynthesis?")
        );
        assert_eq!(wake.remainder("hey agile"), Some(""));
        assert_eq!(wake.remainder("good morning"), None);
    }

    #[test]
    fn test_remainder_with_non_ascii_prefix() {
        let wake = WakePhrase::new("hey agile").unwrap();
        assert_eq!(wake.remainder("İ hey agile. bonjour"), Some("bonjour"));
    }

    #[test]
    fn test_final_sigma_phrase_matches_and_splits() {
        let wake = WakePhrase::new("ΚΟΣΜΟΣ").unwrap();
        assert_eq!(wake.phrase(), "κοσμοσ");

        let segment = "ΚΟΣΜΟΣ what is light";
        assert!(wake.matches(segment));
        assert_eq!(wake.remainder(segment), Some("what is light"));
    }
}
