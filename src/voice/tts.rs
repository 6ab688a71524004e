//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::playback::AudioAsset;
use crate::answer::GenAiClient;
use crate::{Error, Result};

/// Synthesizes speech from text
#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Synthesize `text` in the voice for `language_code`
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails or returns unusable audio
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<AudioAsset>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TtsPayload<'a> {
    text: &'a str,
    language_code: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TtsResponse {
    audio_data_uri: String,
}

impl GenAiClient {
    /// Request synthesized speech, returning the audio data URI
    ///
    /// # Errors
    ///
    /// Returns error if the request fails or the service reports an error
    pub async fn text_to_speech(&self, text: &str, language_code: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Err(Error::Tts("nothing to synthesize".to_string()));
        }

        let response: TtsResponse = self
            .call(
                "textToSpeech",
                &TtsPayload {
                    text,
                    language_code,
                },
            )
            .await?;

        tracing::debug!(
            language_code,
            uri_len = response.audio_data_uri.len(),
            "speech synthesized"
        );
        Ok(response.audio_data_uri)
    }
}

#[async_trait]
impl SpeechSynthesis for GenAiClient {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<AudioAsset> {
        let uri = self.text_to_speech(text, language_code).await?;
        AudioAsset::from_data_uri(&uri)
    }
}
