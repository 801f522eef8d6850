//! Shared helpers for integration tests: a test configuration, in-process
//! fake collaborators, and a thin WebSocket test client.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use voicebot_gateway::config::ServerConfig;
use voicebot_gateway::core::generation::{AnswerRequest, GenerationError, Generator};
use voicebot_gateway::core::pipeline::PipelineEngines;
use voicebot_gateway::core::retrieval::{Passage, RetrievalError, Retriever};
use voicebot_gateway::core::stt::{Transcriber, TranscriptionError};
use voicebot_gateway::core::tts::{SynthesisError, Synthesizer};
use voicebot_gateway::routes;
use voicebot_gateway::state::AppState;
use voicebot_gateway::utils::text::speech_language;

/// Minimal configuration for in-process servers. Provider endpoints are
/// never dialed because tests substitute fake engines.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        tls: None,
        public_base_url: None,
        stt_provider: "whisper".to_string(),
        stt_api_key: Some("test-key".to_string()),
        stt_api_url: "http://localhost:1/transcriptions".to_string(),
        stt_model: "whisper-1".to_string(),
        retrieval_provider: "http".to_string(),
        retrieval_url: "http://localhost:1".to_string(),
        retrieval_top_k: 4,
        llm_provider: "gemini".to_string(),
        llm_api_key: Some("test-key".to_string()),
        llm_api_url: "http://localhost:1".to_string(),
        llm_model: "gemini-2.5-flash-lite".to_string(),
        tts_provider: "openai".to_string(),
        tts_api_key: Some("test-key".to_string()),
        tts_api_url: "http://localhost:1/speech".to_string(),
        tts_model: "gpt-4o-mini-tts".to_string(),
        tts_voice: "alloy".to_string(),
        greeting_text: "Hello! My name is VOICE, how can I assist you today?".to_string(),
        default_language: "en".to_string(),
        inline_audio: true,
        audio_cache_ttl_seconds: 3600,
        stage_timeout_seconds: 10,
        session_retention_seconds: 300,
        cors_allowed_origins: None,
        rate_limit_requests_per_second: 100000,
        rate_limit_burst_size: 100,
        max_websocket_connections: None,
        max_connections_per_ip: 1000,
    }
}

// =============================================================================
// Fake collaborators
// =============================================================================

/// Transcriber that always returns the same transcript.
pub struct ScriptedTranscriber(pub &'static str);

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, _audio: Bytes) -> Result<String, TranscriptionError> {
        Ok(self.0.to_string())
    }
}

/// Retriever that returns a fixed passage list, optionally failing on the
/// first call only (to show the session is freed after a stage error).
pub struct StaticRetriever {
    passages: Vec<Passage>,
    fail_first: AtomicBool,
}

impl StaticRetriever {
    pub fn new(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            fail_first: AtomicBool::new(false),
        }
    }

    pub fn failing_once(passages: Vec<Passage>) -> Self {
        Self {
            passages,
            fail_first: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(
        &self,
        _client_id: &str,
        _query: &str,
        _k: usize,
    ) -> Result<Vec<Passage>, RetrievalError> {
        if self.fail_first.swap(false, Ordering::SeqCst) {
            return Err(RetrievalError::RequestFailed("store offline".to_string()));
        }
        Ok(self.passages.clone())
    }
}

/// Generator that echoes the query. Queries of the form `sleep:<ms>:<text>`
/// sleep before answering, which lets tests stagger stage latencies.
pub struct EchoGenerator {
    pub queries_seen: Mutex<Vec<String>>,
}

impl EchoGenerator {
    pub fn new() -> Self {
        Self {
            queries_seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Generator for EchoGenerator {
    async fn generate(&self, request: AnswerRequest<'_>) -> Result<String, GenerationError> {
        self.queries_seen
            .lock()
            .unwrap()
            .push(request.query.to_string());
        let mut text = request.query;
        if let Some(rest) = text.strip_prefix("sleep:") {
            if let Some((millis, payload)) = rest.split_once(':') {
                if let Ok(millis) = millis.parse::<u64>() {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                    text = payload;
                }
            }
        }
        Ok(format!("answer to: {text}"))
    }
}

/// Synthesizer that embeds the normalized language tag in the audio bytes,
/// so tests can check which language a response was synthesized for.
pub struct TaggingSynthesizer;

#[async_trait]
impl Synthesizer for TaggingSynthesizer {
    async fn synthesize(&self, _text: &str, language: &str) -> Result<Bytes, SynthesisError> {
        Ok(Bytes::from(format!("audio-{}", speech_language(language))))
    }
}

/// Synthesizer that always fails, for the degraded text-only path.
pub struct FailingSynthesizer;

#[async_trait]
impl Synthesizer for FailingSynthesizer {
    async fn synthesize(&self, _text: &str, _language: &str) -> Result<Bytes, SynthesisError> {
        Err(SynthesisError::ServiceError {
            status: 500,
            message: "voice service down".to_string(),
        })
    }
}

/// Engine set used by most scenarios.
pub fn echo_engines() -> PipelineEngines {
    PipelineEngines {
        transcriber: Arc::new(ScriptedTranscriber("what is the full form of AI")),
        retriever: Arc::new(StaticRetriever::new(vec![Passage {
            text: "AI stands for artificial intelligence.".to_string(),
            score: Some(0.9),
        }])),
        generator: Arc::new(EchoGenerator::new()),
        synthesizer: Arc::new(TaggingSynthesizer),
    }
}

// =============================================================================
// Server and client plumbing
// =============================================================================

/// Serve the full router on an ephemeral port and return its address.
pub async fn spawn_server(state: Arc<AppState>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind to random port");
    let addr = listener.local_addr().unwrap();

    let app = routes::api::create_api_router()
        .merge(routes::ws::create_ws_router())
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    addr
}

pub async fn spawn_default_server() -> SocketAddr {
    let state = AppState::with_engines(test_config(), echo_engines());
    spawn_server(state).await
}

/// Thin JSON-envelope WebSocket client for the tests.
pub struct WsClient {
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr, client_id: &str) -> Self {
        let (stream, _response) =
            tokio_tungstenite::connect_async(format!("ws://{addr}/ws/{client_id}"))
                .await
                .expect("WebSocket connect should succeed");
        Self { stream }
    }

    pub async fn send_json(&mut self, value: Value) {
        self.stream
            .send(Message::Text(value.to_string().into()))
            .await
            .expect("send should succeed");
    }

    pub async fn send_raw(&mut self, frame: &str) {
        self.stream
            .send(Message::Text(frame.to_string().into()))
            .await
            .expect("send should succeed");
    }

    /// Next JSON envelope from the server (skips pings), with a deadline.
    pub async fn recv_json(&mut self) -> Value {
        self.try_recv_json(Duration::from_secs(5))
            .await
            .expect("expected a server envelope before the deadline")
    }

    /// Next JSON envelope if one arrives before the deadline.
    pub async fn try_recv_json(&mut self, deadline: Duration) -> Option<Value> {
        let result = tokio::time::timeout(deadline, async {
            while let Some(frame) = self.stream.next().await {
                match frame.expect("transport error") {
                    Message::Text(text) => {
                        return Some(serde_json::from_str(&text).expect("server sent valid JSON"));
                    }
                    Message::Close(_) => return None,
                    _ => continue,
                }
            }
            None
        })
        .await;
        result.ok().flatten()
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }

    /// Drop the TCP side without a close handshake (abrupt disconnect).
    pub fn abandon(self) {
        drop(self.stream);
    }
}
