//! Answer service client tests against an in-process mock server

use futures::StreamExt;
use lumina_spark::voice::SpeechSynthesis;
use lumina_spark::{BackendStatus, Error, GenAiClient, HealthClient};
use url::Url;

mod common;

use common::{FAKE_AUDIO, MockBackend};

fn client(base: &Url) -> GenAiClient {
    GenAiClient::with_client(reqwest::Client::new(), base, "/api/gen-ai/stream").unwrap()
}

#[tokio::test]
async fn test_answer_question_sends_action_envelope() {
    let (base, requests) = MockBackend::default().spawn().await;

    let answer = client(&base)
        .answer_question("what is photosynthesis")
        .await
        .unwrap();
    assert_eq!(answer, "You asked: what is photosynthesis");

    let requests = requests.lock().unwrap();
    let (path, body) = &requests[0];
    assert_eq!(path, "/api/gen-ai");
    assert_eq!(body["action"], "answerQuestion");
    assert_eq!(body["payload"]["question"], "what is photosynthesis");
}

#[tokio::test]
async fn test_text_to_speech_decodes_audio() {
    let (base, requests) = MockBackend::default().spawn().await;

    let audio = client(&base).synthesize("vanakkam", "ta").await.unwrap();
    assert_eq!(audio.mime(), "audio/mpeg");
    assert_eq!(audio.bytes(), FAKE_AUDIO);

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].1["action"], "textToSpeech");
    assert_eq!(requests[0].1["payload"]["languageCode"], "ta");
    assert_eq!(requests[0].1["payload"]["text"], "vanakkam");
}

#[tokio::test]
async fn test_text_to_speech_rejects_empty_text() {
    let (base, requests) = MockBackend::default().spawn().await;

    let result = client(&base).text_to_speech("  ", "en-US").await;
    assert!(matches!(result, Err(Error::Tts(_))));
    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_improve_question_and_summarize() {
    let (base, requests) = MockBackend::default().spawn().await;
    let client = client(&base);

    let refined = client
        .improve_question("what is entropy", "in simple terms")
        .await
        .unwrap();
    assert_eq!(refined, "what is entropy (in simple terms)");

    let summary = client
        .summarize_transcript("one two three four")
        .await
        .unwrap();
    assert_eq!(summary, "4 words");

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].1["payload"]["followUp"], "in simple terms");
    assert_eq!(requests[1].1["action"], "summarizeTranscript");
}

#[tokio::test]
async fn test_service_error_carries_details() {
    let (base, _) = MockBackend {
        action_error: Some((
            "Missing API key".to_string(),
            "GEMINI_API_KEY is not set".to_string(),
        )),
        ..MockBackend::default()
    }
    .spawn()
    .await;

    match client(&base).answer_question("hello").await {
        Err(Error::Service { error, details }) => {
            assert_eq!(error, "Missing API key");
            assert_eq!(details.as_deref(), Some("GEMINI_API_KEY is not set"));
        }
        other => panic!("expected service error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stream_answer_reassembles_fragments() {
    let mut chunks = vec![b"Pho".to_vec(), b"tosynthesis is...".to_vec()];
    // "é" split across two chunks
    chunks.push(vec![b' ', 0xc3]);
    chunks.push(vec![0xa9]);

    let (base, requests) = MockBackend {
        stream_chunks: chunks,
        ..MockBackend::default()
    }
    .spawn()
    .await;

    let stream = client(&base).stream_answer("photosynthesis").await.unwrap();
    let fragments: Vec<String> = stream.map(Result::unwrap).collect().await;
    assert_eq!(fragments.concat(), "Photosynthesis is... é");

    let requests = requests.lock().unwrap();
    assert_eq!(requests[0].0, "/api/gen-ai/stream");
    assert_eq!(requests[0].1["question"], "photosynthesis");
}

#[tokio::test]
async fn test_stream_path_honours_base_prefix() {
    let (base, _) = MockBackend {
        stream_chunks: vec![b"ok".to_vec()],
        ..MockBackend::default()
    }
    .spawn()
    .await;

    let client = GenAiClient::with_client(reqwest::Client::new(), &base, "api/gen-ai/stream")
        .unwrap();
    let fragments: Vec<String> = client
        .stream_answer("q")
        .await
        .unwrap()
        .map(Result::unwrap)
        .collect()
        .await;
    assert_eq!(fragments.concat(), "ok");
}

#[tokio::test]
async fn test_health_ready() {
    let (base, _) = MockBackend::default().spawn().await;
    let health = HealthClient::new(reqwest::Client::new(), &base).unwrap();
    assert_eq!(health.check().await, BackendStatus::Ready);
}

#[tokio::test]
async fn test_health_reports_configuration_error() {
    let (base, _) = MockBackend {
        health_error: Some("GEMINI_API_KEY is not set".to_string()),
        ..MockBackend::default()
    }
    .spawn()
    .await;

    let health = HealthClient::new(reqwest::Client::new(), &base).unwrap();
    assert_eq!(
        health.check().await,
        BackendStatus::Misconfigured("GEMINI_API_KEY is not set".to_string())
    );
}

#[tokio::test]
async fn test_health_unreachable_is_not_ready() {
    // Bind then drop to get a port nothing listens on
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let base = Url::parse(&format!("http://{addr}")).unwrap();
    let health = HealthClient::new(reqwest::Client::new(), &base).unwrap();
    assert!(!health.check().await.is_ready());
}
