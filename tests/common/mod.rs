//! Shared test utilities

#![allow(dead_code)]

use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use serde_json::{Value, json};
use url::Url;

use lumina_spark::Config;
use lumina_spark::config::LuminaConfigFile;
use lumina_spark::voice::{DeviceSignal, Segment, SpeechDevice, UtteranceEvent};

/// Bytes returned as synthesized audio
pub const FAKE_AUDIO: &[u8] = b"ID3fake-mp3";

/// Behaviour of the mock answer service
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    /// Health endpoint reports this configuration error
    pub health_error: Option<String>,
    /// Body chunks of the stream endpoint
    pub stream_chunks: Vec<Vec<u8>>,
    /// Every action fails with this `{error, details}` body
    pub action_error: Option<(String, String)>,
}

/// Requests received by the mock, as `(path, body)`
pub type Requests = Arc<Mutex<Vec<(String, Value)>>>;

#[derive(Clone)]
struct MockState {
    backend: MockBackend,
    requests: Requests,
}

impl MockBackend {
    /// Serve on an ephemeral port, returning the base URL
    pub async fn spawn(self) -> (Url, Requests) {
        let requests = Requests::default();
        let state = MockState {
            backend: self,
            requests: requests.clone(),
        };

        let app = Router::new()
            .route("/api/gen-ai", post(gen_ai))
            .route("/api/gen-ai/stream", post(stream))
            .route("/api/health", get(health))
            .with_state(state);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock server");
        let addr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("mock server failed");
        });

        let url = Url::parse(&format!("http://{addr}")).expect("invalid mock url");
        (url, requests)
    }
}

async fn gen_ai(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(("/api/gen-ai".to_string(), body.clone()));

    if let Some((error, details)) = &state.backend.action_error {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": error, "details": details })),
        )
            .into_response();
    }

    let payload = &body["payload"];
    match body["action"].as_str() {
        Some("answerQuestion") => Json(json!({
            "answer": format!("You asked: {}", payload["question"].as_str().unwrap_or_default())
        }))
        .into_response(),
        Some("textToSpeech") => {
            let encoded = base64::engine::general_purpose::STANDARD.encode(FAKE_AUDIO);
            Json(json!({ "audioDataUri": format!("data:audio/mpeg;base64,{encoded}") }))
                .into_response()
        }
        Some("improveQuestion") => Json(json!({
            "refinedQuestion": format!(
                "{} ({})",
                payload["question"].as_str().unwrap_or_default(),
                payload["followUp"].as_str().unwrap_or_default()
            )
        }))
        .into_response(),
        Some("summarizeTranscript") => Json(json!({
            "summary": format!("{} words", payload["transcript"].as_str().unwrap_or_default().split_whitespace().count())
        }))
        .into_response(),
        _ => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Invalid action" })),
        )
            .into_response(),
    }
}

async fn stream(State(state): State<MockState>, Json(body): Json<Value>) -> Response {
    state
        .requests
        .lock()
        .unwrap()
        .push(("/api/gen-ai/stream".to_string(), body));

    let chunks = state
        .backend
        .stream_chunks
        .into_iter()
        .map(Ok::<_, Infallible>);
    Body::from_stream(futures::stream::iter(chunks)).into_response()
}

async fn health(State(state): State<MockState>) -> Response {
    match state.backend.health_error {
        Some(error) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": error })),
        )
            .into_response(),
        None => Json(json!({ "status": "ok" })).into_response(),
    }
}

/// Configuration with defaults and no environment
pub fn test_config() -> Config {
    Config::resolve(LuminaConfigFile::default(), |_| None).expect("default config")
}

/// Speech device that records start/stop calls
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail_start: bool,
}

impl RecordingDevice {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl SpeechDevice for RecordingDevice {
    fn start(&mut self, language: &str) -> lumina_spark::Result<()> {
        self.calls.lock().unwrap().push(format!("start {language}"));
        if self.fail_start {
            return Err(lumina_spark::Error::Config("no microphone".to_string()));
        }
        Ok(())
    }

    fn stop(&mut self) {
        self.calls.lock().unwrap().push("stop".to_string());
    }
}

/// A device signal carrying one final segment
pub fn heard(text: &str) -> DeviceSignal {
    DeviceSignal::Utterance(UtteranceEvent::new(vec![Segment::final_text(text)]))
}

/// An utterance event with the given segments
pub fn utterance(segments: Vec<Segment>) -> UtteranceEvent {
    UtteranceEvent::new(segments)
}
