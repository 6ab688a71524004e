//! Answer service client
//!
//! All flows go through one route, `POST /api/gen-ai`, with an
//! `{action, payload}` envelope. Streamed answers use a separate endpoint
//! that returns the answer as a plain text body, delivered in chunks.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ApiConfig;
use crate::{Error, Result};

/// Path of the action route
pub const GEN_AI_PATH: &str = "/api/gen-ai";

/// Stream of answer fragments, in arrival order
pub type AnswerStream = BoxStream<'static, Result<String>>;

/// Produces answers to user questions
#[async_trait]
pub trait AnswerService: Send + Sync {
    /// Fetch the complete answer
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service reports an error
    async fn answer(&self, question: &str) -> Result<String>;

    /// Fetch the answer as a stream of text fragments
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened
    async fn answer_stream(&self, question: &str) -> Result<AnswerStream>;
}

/// Resolve `path` against `base`, keeping any path prefix of `base`
///
/// # Errors
///
/// Returns error if the result is not a valid URL
pub fn endpoint(base: &Url, path: &str) -> Result<Url> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

#[derive(Serialize)]
struct ActionRequest<'a, P> {
    action: &'a str,
    payload: &'a P,
}

#[derive(Serialize)]
struct QuestionPayload<'a> {
    question: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImproveQuestionPayload<'a> {
    question: &'a str,
    follow_up: &'a str,
}

#[derive(Serialize)]
struct SummarizePayload<'a> {
    transcript: &'a str,
}

#[derive(Deserialize)]
struct AnswerResponse {
    answer: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImproveQuestionResponse {
    refined_question: String,
}

#[derive(Deserialize)]
struct SummarizeResponse {
    summary: String,
}

/// Error body returned by the service
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    details: Option<String>,
}

/// HTTP client for the generative AI route
#[derive(Debug, Clone)]
pub struct GenAiClient {
    client: reqwest::Client,
    base_url: Url,
    route: Url,
    stream_url: Url,
}

impl GenAiClient {
    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client or endpoint URLs cannot be built
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Self::with_client(client, &config.base_url, &config.stream_path)
    }

    /// Create a client sharing an existing `reqwest::Client`
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint URLs cannot be built
    pub fn with_client(client: reqwest::Client, base_url: &Url, stream_path: &str) -> Result<Self> {
        Ok(Self {
            client,
            base_url: base_url.clone(),
            route: endpoint(base_url, GEN_AI_PATH)?,
            stream_url: endpoint(base_url, stream_path)?,
        })
    }

    /// Underlying HTTP client
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Base URL of the service
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Invoke an action on the route
    pub(crate) async fn call<P, R>(&self, action: &str, payload: &P) -> Result<R>
    where
        P: Serialize + Sync,
        R: DeserializeOwned,
    {
        tracing::debug!(action, url = %self.route, "calling answer service");

        let response = self
            .client
            .post(self.route.clone())
            .json(&ActionRequest { action, payload })
            .send()
            .await
            .map_err(|e| {
                tracing::error!(action, error = %e, "answer service request failed");
                e
            })?;

        let response = error_for_status(response).await?;
        let result = response.json().await.map_err(|e| {
            tracing::error!(action, error = %e, "failed to parse answer service response");
            e
        })?;
        Ok(result)
    }

    /// Answer a question
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service reports an error
    pub async fn answer_question(&self, question: &str) -> Result<String> {
        let response: AnswerResponse = self
            .call("answerQuestion", &QuestionPayload { question })
            .await?;
        tracing::info!(answer_len = response.answer.len(), "answer received");
        Ok(response.answer)
    }

    /// Combine a question and a follow-up prompt into one refined question
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service reports an error
    pub async fn improve_question(&self, question: &str, follow_up: &str) -> Result<String> {
        let response: ImproveQuestionResponse = self
            .call(
                "improveQuestion",
                &ImproveQuestionPayload {
                    question,
                    follow_up,
                },
            )
            .await?;
        Ok(response.refined_question)
    }

    /// Summarize a transcript
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service reports an error
    pub async fn summarize_transcript(&self, transcript: &str) -> Result<String> {
        let response: SummarizeResponse = self
            .call("summarizeTranscript", &SummarizePayload { transcript })
            .await?;
        Ok(response.summary)
    }

    /// Stream the answer to a question
    ///
    /// # Errors
    ///
    /// Returns error if the request fails before the body starts
    pub async fn stream_answer(&self, question: &str) -> Result<AnswerStream> {
        tracing::debug!(url = %self.stream_url, "requesting streamed answer");

        let response = self
            .client
            .post(self.stream_url.clone())
            .json(&QuestionPayload { question })
            .send()
            .await?;
        let response = error_for_status(response).await?;

        let bytes = response.bytes_stream().boxed();
        let fragments = stream::unfold(Some((bytes, Utf8Chunks::default())), |state| async move {
            let (mut bytes, mut decoder) = state?;
            loop {
                match bytes.next().await {
                    Some(Ok(chunk)) => {
                        let text = decoder.push(&chunk);
                        if !text.is_empty() {
                            return Some((Ok(text), Some((bytes, decoder))));
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "answer stream failed");
                        return Some((Err(Error::from(e)), None));
                    }
                    None => {
                        let tail = decoder.finish();
                        return (!tail.is_empty()).then_some((Ok(tail), None));
                    }
                }
            }
        });

        Ok(fragments.boxed())
    }
}

#[async_trait]
impl AnswerService for GenAiClient {
    async fn answer(&self, question: &str) -> Result<String> {
        self.answer_question(question).await
    }

    async fn answer_stream(&self, question: &str) -> Result<AnswerStream> {
        self.stream_answer(question).await
    }
}

/// Turn a non-success response into [`Error::Service`]
async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(%status, body = %body, "answer service error");

    Err(match serde_json::from_str::<ErrorBody>(&body) {
        Ok(ErrorBody { error, details }) => Error::Service { error, details },
        Err(_) => Error::Service {
            error: format!("request failed with status {status}"),
            details: (!body.is_empty()).then_some(body),
        },
    })
}

/// Incremental UTF-8 decoder for chunked bodies
///
/// Multi-byte characters split across chunks are held back until complete.
#[derive(Debug, Default)]
pub struct Utf8Chunks {
    pending: Vec<u8>,
}

impl Utf8Chunks {
    /// Decode as much of `bytes` (plus held-back bytes) as possible
    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            let (valid, invalid) = match std::str::from_utf8(&self.pending) {
                Ok(_) => (self.pending.len(), None),
                Err(e) => (e.valid_up_to(), Some(e.error_len())),
            };
            out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));

            match invalid {
                None => {
                    self.pending.clear();
                    break;
                }
                Some(Some(len)) => {
                    out.push(char::REPLACEMENT_CHARACTER);
                    self.pending.drain(..valid + len);
                }
                Some(None) => {
                    self.pending.drain(..valid);
                    break;
                }
            }
        }

        out
    }

    /// Flush held-back bytes at end of stream
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

/// An answer being assembled from streamed fragments
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StreamedAnswer {
    text: String,
    fragments: usize,
}

impl StreamedAnswer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the next fragment
    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    /// Text assembled so far
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of fragments received
    #[must_use]
    pub const fn fragments(&self) -> usize {
        self.fragments
    }

    /// No visible text received yet
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    #[must_use]
    pub fn into_text(self) -> String {
        self.text
    }
}
