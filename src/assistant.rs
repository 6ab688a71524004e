//! Question answering orchestration
//!
//! Takes a captured [`Turn`](crate::voice::Turn) through the answer service
//! (streamed or complete), then speech synthesis, producing everything the
//! history needs. Only one turn is in flight at a time; see [`TurnTracker`].

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use uuid::Uuid;

use crate::answer::{AnswerService, StreamedAnswer};
use crate::history::QaPair;
use crate::language::Language;
use crate::voice::{AudioAsset, SpeechSynthesis};
use crate::{Error, Result};

/// Result of answering one turn
#[derive(Debug)]
pub struct TurnOutcome {
    pub question: String,
    pub answer: String,
    pub audio: Option<AudioAsset>,
    /// The stream failed after some text arrived; `answer` is partial
    pub interrupted: bool,
    /// Why the stream was interrupted
    pub stream_error: Option<Error>,
    /// Why no audio was produced
    pub synthesis_error: Option<Error>,
}

impl TurnOutcome {
    /// History entry for this outcome
    #[must_use]
    pub fn into_pair(self) -> QaPair {
        QaPair {
            id: Uuid::new_v4(),
            asked_at: Utc::now(),
            question: self.question,
            answer: self.answer,
            audio: self.audio,
            interrupted: self.interrupted,
        }
    }
}

/// Answers questions and voices the answers
#[derive(Clone)]
pub struct Assistant {
    answers: Arc<dyn AnswerService>,
    synth: Arc<dyn SpeechSynthesis>,
    streaming: bool,
}

impl Assistant {
    #[must_use]
    pub fn new(
        answers: Arc<dyn AnswerService>,
        synth: Arc<dyn SpeechSynthesis>,
        streaming: bool,
    ) -> Self {
        Self {
            answers,
            synth,
            streaming,
        }
    }

    /// Whether answers are requested as a stream
    #[must_use]
    pub const fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Answer `question` and synthesize the answer in `language_code`
    ///
    /// `progress` receives each streamed fragment as it arrives. Synthesis
    /// failures are carried in the outcome rather than failing the turn.
    ///
    /// # Errors
    ///
    /// Returns error if no answer text could be obtained
    pub async fn answer_turn<F>(
        &self,
        question: &str,
        language_code: &str,
        mut progress: F,
    ) -> Result<TurnOutcome>
    where
        F: FnMut(&str) + Send,
    {
        let (answer, stream_error) = if self.streaming {
            self.stream_answer(question, &mut progress).await?
        } else {
            (self.answers.answer(question).await?, None)
        };

        if answer.trim().is_empty() {
            return Err(Error::service("The answer service returned an empty answer"));
        }

        let tts_code = Language::tts_code_for(language_code);
        let (audio, synthesis_error) = match self.synth.synthesize(&answer, tts_code).await {
            Ok(audio) => (Some(audio), None),
            Err(e) => {
                tracing::warn!(error = %e, tts_code, "speech synthesis failed");
                (None, Some(e))
            }
        };

        Ok(TurnOutcome {
            question: question.to_string(),
            answer,
            audio,
            interrupted: stream_error.is_some(),
            stream_error,
            synthesis_error,
        })
    }

    async fn stream_answer<F>(
        &self,
        question: &str,
        progress: &mut F,
    ) -> Result<(String, Option<Error>)>
    where
        F: FnMut(&str) + Send,
    {
        let mut stream = self.answers.answer_stream(question).await?;
        let mut assembled = StreamedAnswer::new();

        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    progress(&fragment);
                    assembled.push(&fragment);
                }
                Err(e) if assembled.is_blank() => {
                    tracing::warn!(error = %e, "answer stream failed before any text");
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        fragments = assembled.fragments(),
                        "answer stream interrupted, keeping partial answer"
                    );
                    return Ok((assembled.into_text(), Some(e)));
                }
            }
        }

        tracing::debug!(fragments = assembled.fragments(), "answer stream finished");
        Ok((assembled.into_text(), None))
    }
}

/// Tracks the single in-flight turn
///
/// Each turn gets a new generation. Results for any generation other than the
/// pending one are stale and must be dropped.
#[derive(Debug, Default)]
pub struct TurnTracker {
    generation: u64,
    pending: Option<u64>,
}

impl TurnTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a turn, or `None` if one is already pending
    pub fn begin(&mut self) -> Option<u64> {
        if self.pending.is_some() {
            return None;
        }
        self.generation += 1;
        self.pending = Some(self.generation);
        Some(self.generation)
    }

    /// Abandon the pending turn, returning its generation
    pub fn supersede(&mut self) -> Option<u64> {
        self.pending.take()
    }

    /// Finish `generation`; false if it is stale
    pub fn finish(&mut self, generation: u64) -> bool {
        if self.pending == Some(generation) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Whether `generation` is the pending turn
    #[must_use]
    pub fn is_current(&self, generation: u64) -> bool {
        self.pending == Some(generation)
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use futures::stream;

    use super::*;
    use crate::answer::AnswerStream;

    struct FakeAnswers {
        answer: String,
        fragments: Vec<Result<String>>,
    }

    impl FakeAnswers {
        fn complete(answer: &str) -> Self {
            Self {
                answer: answer.to_string(),
                fragments: Vec::new(),
            }
        }

        fn streamed(fragments: Vec<Result<String>>) -> Self {
            Self {
                answer: String::new(),
                fragments,
            }
        }
    }

    #[async_trait]
    impl AnswerService for FakeAnswers {
        async fn answer(&self, _question: &str) -> Result<String> {
            Ok(self.answer.clone())
        }

        async fn answer_stream(&self, _question: &str) -> Result<AnswerStream> {
            let fragments: Vec<Result<String>> = self
                .fragments
                .iter()
                .map(|f| match f {
                    Ok(text) => Ok(text.clone()),
                    Err(e) => Err(Error::service(e.to_string())),
                })
                .collect();
            Ok(stream::iter(fragments).boxed())
        }
    }

    #[derive(Default)]
    struct FakeSynth {
        fail: bool,
        codes: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesis for FakeSynth {
        async fn synthesize(&self, _text: &str, language_code: &str) -> Result<AudioAsset> {
            self.codes.lock().unwrap().push(language_code.to_string());
            if self.fail {
                return Err(Error::Tts("voice unavailable".to_string()));
            }
            Ok(AudioAsset::new("audio/wav", vec![1, 2, 3]))
        }
    }

    #[tokio::test]
    async fn test_complete_answer_is_synthesized() {
        let synth = Arc::new(FakeSynth::default());
        let assistant = Assistant::new(
            Arc::new(FakeAnswers::complete("Entropy measures disorder.")),
            synth.clone(),
            false,
        );

        let outcome = assistant
            .answer_turn("explain entropy", "ta-IN", |_| {})
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Entropy measures disorder.");
        assert!(outcome.audio.is_some());
        assert!(!outcome.interrupted);
        assert_eq!(synth.codes.lock().unwrap().as_slice(), ["ta"]);
    }

    #[tokio::test]
    async fn test_streamed_fragments_assemble_in_order() {
        let assistant = Assistant::new(
            Arc::new(FakeAnswers::streamed(vec![
                Ok("Pho".to_string()),
                Ok("tosynthesis is...".to_string()),
            ])),
            Arc::new(FakeSynth::default()),
            true,
        );

        let mut seen = Vec::new();
        let outcome = assistant
            .answer_turn("what is photosynthesis", "en-US", |chunk| {
                seen.push(chunk.to_string());
            })
            .await
            .unwrap();

        assert_eq!(outcome.answer, "Photosynthesis is...");
        assert_eq!(seen, vec!["Pho", "tosynthesis is..."]);
    }

    #[tokio::test]
    async fn test_stream_error_before_text_fails_turn() {
        let assistant = Assistant::new(
            Arc::new(FakeAnswers::streamed(vec![
                Ok("  ".to_string()),
                Err(Error::service("connection reset")),
            ])),
            Arc::new(FakeSynth::default()),
            true,
        );

        let result = assistant.answer_turn("q", "en-US", |_| {}).await;
        assert!(matches!(result, Err(Error::Service { .. })));
    }

    #[tokio::test]
    async fn test_stream_error_after_text_keeps_partial() {
        let assistant = Assistant::new(
            Arc::new(FakeAnswers::streamed(vec![
                Ok("Photo".to_string()),
                Err(Error::service("connection reset")),
            ])),
            Arc::new(FakeSynth::default()),
            true,
        );

        let outcome = assistant.answer_turn("q", "en-US", |_| {}).await.unwrap();
        assert_eq!(outcome.answer, "Photo");
        assert!(outcome.interrupted);
        assert!(outcome.stream_error.is_some());
        assert!(outcome.into_pair().interrupted);
    }

    #[tokio::test]
    async fn test_synthesis_failure_keeps_answer() {
        let assistant = Assistant::new(
            Arc::new(FakeAnswers::complete("42")),
            Arc::new(FakeSynth {
                fail: true,
                ..FakeSynth::default()
            }),
            false,
        );

        let outcome = assistant.answer_turn("q", "en-US", |_| {}).await.unwrap();
        assert_eq!(outcome.answer, "42");
        assert!(outcome.audio.is_none());
        assert!(matches!(outcome.synthesis_error, Some(Error::Tts(_))));
    }

    #[tokio::test]
    async fn test_empty_answer_fails() {
        let assistant = Assistant::new(
            Arc::new(FakeAnswers::complete("   ")),
            Arc::new(FakeSynth::default()),
            false,
        );
        assert!(assistant.answer_turn("q", "en-US", |_| {}).await.is_err());
    }

    #[test]
    fn test_tracker_single_pending_turn() {
        let mut tracker = TurnTracker::new();
        let first = tracker.begin().unwrap();
        assert!(tracker.begin().is_none());
        assert!(tracker.is_current(first));
        assert!(tracker.finish(first));
        assert!(!tracker.is_pending());
        assert!(tracker.begin().is_some());
    }

    #[test]
    fn test_tracker_superseded_result_is_stale() {
        let mut tracker = TurnTracker::new();
        let first = tracker.begin().unwrap();
        assert_eq!(tracker.supersede(), Some(first));

        let second = tracker.begin().unwrap();
        assert_ne!(first, second);
        assert!(!tracker.finish(first));
        assert!(tracker.finish(second));
    }
}
