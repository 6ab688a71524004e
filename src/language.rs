//! Supported recognition languages and their speech synthesis codes

/// A language the assistant can listen and answer in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Language {
    /// Recognition language code (BCP 47)
    pub code: &'static str,
    /// English name
    pub name: &'static str,
    /// Name in the language itself
    pub local_name: &'static str,
    /// Language code passed to speech synthesis
    pub tts_code: &'static str,
}

/// All supported languages
pub const LANGUAGES: &[Language] = &[
    Language {
        code: "en-US",
        name: "English",
        local_name: "English",
        tts_code: "en-US",
    },
    Language {
        code: "hi-IN",
        name: "Hindi",
        local_name: "हिंदी",
        tts_code: "hi-IN",
    },
    Language {
        code: "ta-IN",
        name: "Tamil",
        local_name: "தமிழ்",
        tts_code: "ta",
    },
    Language {
        code: "te-IN",
        name: "Telugu",
        local_name: "తెలుగు",
        tts_code: "te",
    },
];

impl Language {
    /// Code used when nothing else is configured
    pub const DEFAULT_CODE: &'static str = "en-US";

    /// Look up a language by recognition code (case-insensitive)
    #[must_use]
    pub fn by_code(code: &str) -> Option<&'static Self> {
        LANGUAGES
            .iter()
            .find(|l| l.code.eq_ignore_ascii_case(code.trim()))
    }

    /// Synthesis code for a recognition code, falling back to `en-US`
    #[must_use]
    pub fn tts_code_for(code: &str) -> &'static str {
        Self::by_code(code).map_or(Self::DEFAULT_CODE, |l| l.tts_code)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) [{}]", self.name, self.local_name, self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(Language::by_code("hi-in").map(|l| l.name), Some("Hindi"));
        assert!(Language::by_code("fr-FR").is_none());
    }

    #[test]
    fn test_tts_code_mapping() {
        assert_eq!(Language::tts_code_for("ta-IN"), "ta");
        assert_eq!(Language::tts_code_for("te-IN"), "te");
        assert_eq!(Language::tts_code_for("en-US"), "en-US");
        assert_eq!(Language::tts_code_for("xx"), "en-US");
    }
}
