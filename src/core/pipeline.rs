//! Per-request pipeline orchestration.
//!
//! Each accepted query runs through a linear stage sequence with no backward
//! edges: transcribe (audio input only), normalize, retrieve, generate,
//! synthesize. Every stage result is a fully resolved value before the next
//! stage starts, and every collaborator call is bounded by the configured
//! per-stage timeout. A stage failure aborts the request with the failing
//! stage attached — except synthesis, which degrades the response to
//! text-only instead of discarding a generated answer.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::core::generation::{AnswerRequest, GenerationError, Generator, LlmConfig, create_generator};
use crate::core::retrieval::{RetrievalConfig, RetrievalError, Retriever, create_retriever};
use crate::core::session::{QueryInput, Session};
use crate::core::stt::{SttConfig, Transcriber, TranscriptionError, create_transcriber};
use crate::core::tts::{SynthesisError, Synthesizer, TtsConfig, create_synthesizer};
use crate::utils::text::speech_language;

/// The pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Transcribing,
    Retrieving,
    Generating,
    Synthesizing,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Transcribing => write!(f, "transcribing"),
            PipelineStage::Retrieving => write!(f, "retrieving"),
            PipelineStage::Generating => write!(f, "generating"),
            PipelineStage::Synthesizing => write!(f, "synthesizing"),
        }
    }
}

/// A request aborted at a pipeline stage.
#[derive(Debug, Error)]
#[error("{stage} failed: {message}")]
pub struct PipelineError {
    pub stage: PipelineStage,
    pub message: String,
}

/// Errors raised while constructing the collaborator set from configuration.
#[derive(Debug, Error)]
pub enum PipelineInitError {
    #[error("speech-to-text setup failed: {0}")]
    Stt(#[from] TranscriptionError),
    #[error("retrieval setup failed: {0}")]
    Retrieval(#[from] RetrievalError),
    #[error("generation setup failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("speech synthesis setup failed: {0}")]
    Synthesis(#[from] SynthesisError),
}

/// Synthesized speech for one completed request.
///
/// The sequence number is assigned when the owning request completes, not
/// when it was submitted; the client's playback sequencer orders by it.
#[derive(Debug, Clone)]
pub struct AudioArtifact {
    pub sequence: u64,
    /// Normalized language tag the audio was synthesized for.
    pub language: String,
    pub data: Bytes,
}

/// The emitted result of one pipeline run.
#[derive(Debug)]
pub struct PipelineOutput {
    /// Transcribed user utterance, present only for audio input; rendered
    /// to the client as a `user_message` before the `response`.
    pub transcript: Option<String>,
    pub answer: String,
    /// Absent when synthesis failed (degraded, text-only response).
    pub audio: Option<AudioArtifact>,
}

/// Policy knobs for one pipeline run.
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub stage_timeout: Duration,
    pub retrieval_top_k: usize,
}

impl PipelineOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            stage_timeout: config.stage_timeout(),
            retrieval_top_k: config.retrieval_top_k,
        }
    }
}

/// The collaborator set the orchestrator drives.
pub struct PipelineEngines {
    pub transcriber: Arc<dyn Transcriber>,
    pub retriever: Arc<dyn Retriever>,
    pub generator: Arc<dyn Generator>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

impl PipelineEngines {
    /// Build the provider set named by the configuration.
    pub fn from_config(config: &ServerConfig) -> Result<Self, PipelineInitError> {
        let transcriber = create_transcriber(
            &config.stt_provider,
            SttConfig {
                api_key: config.stt_api_key.clone().unwrap_or_default(),
                api_url: config.stt_api_url.clone(),
                model: config.stt_model.clone(),
            },
        )?;
        let retriever = create_retriever(
            &config.retrieval_provider,
            RetrievalConfig {
                base_url: config.retrieval_url.clone(),
            },
        )?;
        let generator = create_generator(
            &config.llm_provider,
            LlmConfig {
                api_key: config.llm_api_key.clone().unwrap_or_default(),
                api_url: config.llm_api_url.clone(),
                model: config.llm_model.clone(),
            },
        )?;
        let synthesizer = create_synthesizer(
            &config.tts_provider,
            TtsConfig {
                api_key: config.tts_api_key.clone().unwrap_or_default(),
                api_url: config.tts_api_url.clone(),
                model: config.tts_model.clone(),
                voice: config.tts_voice.clone(),
            },
        )?;
        Ok(Self {
            transcriber,
            retriever,
            generator,
            synthesizer,
        })
    }
}

/// Await one collaborator call under the per-stage deadline.
async fn run_stage<T, E, F>(
    stage: PipelineStage,
    limit: Duration,
    fut: F,
) -> Result<T, PipelineError>
where
    E: fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError {
            stage,
            message: e.to_string(),
        }),
        Err(_) => Err(PipelineError {
            stage,
            message: format!("timed out after {}s", limit.as_secs()),
        }),
    }
}

/// Drive one query through the full stage sequence against one session.
///
/// The session's language (and persona) is snapshotted here, when the
/// request begins processing; a `language_switch` arriving afterwards only
/// affects later requests.
pub async fn run_query(
    engines: &PipelineEngines,
    session: &Session,
    input: QueryInput,
    options: &PipelineOptions,
) -> Result<PipelineOutput, PipelineError> {
    let language = session.language();
    let timeout = options.stage_timeout;

    // Transcribe (audio input only), then normalize. An empty transcript is
    // carried forward rather than failing; retrieval and generation may
    // still produce a useful clarifying answer.
    let (transcript, normalized) = match input {
        QueryInput::Text(text) => (None, text.trim().to_string()),
        QueryInput::Audio(audio) => {
            let text = run_stage(
                PipelineStage::Transcribing,
                timeout,
                engines.transcriber.transcribe(audio),
            )
            .await?;
            let normalized = text.trim().to_string();
            (Some(text), normalized)
        }
    };

    session.observe_user_name(&normalized);
    let user_name = session.user_name();
    let history = session.history();

    let passages = run_stage(
        PipelineStage::Retrieving,
        timeout,
        engines
            .retriever
            .retrieve(session.client_id(), &normalized, options.retrieval_top_k),
    )
    .await?;

    let answer = run_stage(
        PipelineStage::Generating,
        timeout,
        engines.generator.generate(AnswerRequest {
            query: &normalized,
            passages: &passages,
            language: &language,
            user_name: user_name.as_deref(),
            history: &history,
        }),
    )
    .await?;

    // Synthesis failure is not answer failure: degrade to text-only.
    let audio = match run_stage(
        PipelineStage::Synthesizing,
        timeout,
        engines.synthesizer.synthesize(&answer, &language),
    )
    .await
    {
        Ok(data) => Some(AudioArtifact {
            sequence: session.next_artifact_seq(),
            language: speech_language(&language).to_string(),
            data,
        }),
        Err(e) => {
            warn!(client_id = %session.client_id(), error = %e, "synthesis failed, sending text-only response");
            None
        }
    };

    session.record_turn(normalized, answer.clone());
    debug!(
        client_id = %session.client_id(),
        audio = audio.is_some(),
        "pipeline run completed"
    );

    Ok(PipelineOutput {
        transcript,
        answer,
        audio,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retrieval::Passage;
    use crate::core::session::SessionRegistry;
    use async_trait::async_trait;

    struct FixedTranscriber(Result<&'static str, ()>);

    #[async_trait]
    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _audio: Bytes) -> Result<String, TranscriptionError> {
            self.0
                .map(|t| t.to_string())
                .map_err(|_| TranscriptionError::RequestFailed("decoder offline".to_string()))
        }
    }

    struct FixedRetriever {
        passages: Result<Vec<Passage>, ()>,
    }

    impl FixedRetriever {
        fn ok(passages: Vec<Passage>) -> Self {
            Self {
                passages: Ok(passages),
            }
        }

        fn failing() -> Self {
            Self { passages: Err(()) }
        }
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn retrieve(
            &self,
            _client_id: &str,
            _query: &str,
            _k: usize,
        ) -> Result<Vec<Passage>, RetrievalError> {
            match &self.passages {
                Ok(p) => Ok(p.clone()),
                Err(_) => Err(RetrievalError::RequestFailed("store offline".to_string())),
            }
        }
    }

    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, request: AnswerRequest<'_>) -> Result<String, GenerationError> {
            Ok(format!("answer to: {}", request.query))
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _request: AnswerRequest<'_>) -> Result<String, GenerationError> {
            Err(GenerationError::ServiceError {
                status: 503,
                message: "model overloaded".to_string(),
            })
        }
    }

    struct SlowGenerator;

    #[async_trait]
    impl Generator for SlowGenerator {
        async fn generate(&self, _request: AnswerRequest<'_>) -> Result<String, GenerationError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("too late".to_string())
        }
    }

    /// Synthesizer that tags the audio payload with the requested language.
    struct TaggingSynthesizer {
        fail: bool,
    }

    #[async_trait]
    impl Synthesizer for TaggingSynthesizer {
        async fn synthesize(&self, _text: &str, language: &str) -> Result<Bytes, SynthesisError> {
            if self.fail {
                Err(SynthesisError::ServiceError {
                    status: 500,
                    message: "voice service down".to_string(),
                })
            } else {
                Ok(Bytes::from(speech_language(language).as_bytes().to_vec()))
            }
        }
    }

    fn engines(
        transcriber: FixedTranscriber,
        retriever: FixedRetriever,
        generator: Arc<dyn Generator>,
        synth_fails: bool,
    ) -> PipelineEngines {
        PipelineEngines {
            transcriber: Arc::new(transcriber),
            retriever: Arc::new(retriever),
            generator,
            synthesizer: Arc::new(TaggingSynthesizer { fail: synth_fails }),
        }
    }

    fn options() -> PipelineOptions {
        PipelineOptions {
            stage_timeout: Duration::from_millis(500),
            retrieval_top_k: 4,
        }
    }

    fn session() -> Arc<Session> {
        SessionRegistry::new("en".to_string(), Duration::from_secs(300))
            .get_or_create("client_demo")
    }

    #[tokio::test]
    async fn test_text_query_produces_answer_and_audio() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![Passage {
                text: "AI stands for artificial intelligence".to_string(),
                score: None,
            }]),
            Arc::new(EchoGenerator),
            false,
        );

        let output = run_query(
            &engines,
            &session,
            QueryInput::Text("  What is the full form of AI?  ".to_string()),
            &options(),
        )
        .await
        .expect("pipeline should succeed");

        assert_eq!(output.transcript, None);
        assert_eq!(output.answer, "answer to: What is the full form of AI?");
        let audio = output.audio.expect("audio should be present");
        assert_eq!(audio.sequence, 1);
        assert_eq!(audio.language, "en");
    }

    #[tokio::test]
    async fn test_audio_query_carries_transcript_echo() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("what are the amenities")),
            FixedRetriever::ok(vec![]),
            Arc::new(EchoGenerator),
            false,
        );

        let output = run_query(
            &engines,
            &session,
            QueryInput::Audio(Bytes::from_static(b"pcm")),
            &options(),
        )
        .await
        .expect("pipeline should succeed");

        assert_eq!(output.transcript.as_deref(), Some("what are the amenities"));
        assert_eq!(output.answer, "answer to: what are the amenities");
    }

    #[tokio::test]
    async fn test_empty_transcript_proceeds() {
        let session = session();
        let retriever = FixedRetriever::ok(vec![]);
        let engines = PipelineEngines {
            transcriber: Arc::new(FixedTranscriber(Ok("   "))),
            retriever: Arc::new(retriever),
            generator: Arc::new(EchoGenerator),
            synthesizer: Arc::new(TaggingSynthesizer { fail: false }),
        };

        let output = run_query(
            &engines,
            &session,
            QueryInput::Audio(Bytes::from_static(b"static")),
            &options(),
        )
        .await
        .expect("empty transcript must not abort the pipeline");

        assert_eq!(output.answer, "answer to: ");
    }

    #[tokio::test]
    async fn test_transcription_failure_aborts_with_stage() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Err(())),
            FixedRetriever::ok(vec![]),
            Arc::new(EchoGenerator),
            false,
        );

        let err = run_query(
            &engines,
            &session,
            QueryInput::Audio(Bytes::from_static(b"pcm")),
            &options(),
        )
        .await
        .expect_err("transcription error should abort");
        assert_eq!(err.stage, PipelineStage::Transcribing);
    }

    #[tokio::test]
    async fn test_retrieval_failure_aborts_with_stage() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::failing(),
            Arc::new(EchoGenerator),
            false,
        );

        let err = run_query(
            &engines,
            &session,
            QueryInput::Text("anything".to_string()),
            &options(),
        )
        .await
        .expect_err("retrieval error should abort");
        assert_eq!(err.stage, PipelineStage::Retrieving);
        assert!(err.message.contains("store offline"));
    }

    #[tokio::test]
    async fn test_generation_failure_aborts_with_stage() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![]),
            Arc::new(FailingGenerator),
            false,
        );

        let err = run_query(
            &engines,
            &session,
            QueryInput::Text("anything".to_string()),
            &options(),
        )
        .await
        .expect_err("generation error should abort");
        assert_eq!(err.stage, PipelineStage::Generating);
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades_to_text_only() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![]),
            Arc::new(EchoGenerator),
            true,
        );

        let output = run_query(
            &engines,
            &session,
            QueryInput::Text("anything".to_string()),
            &options(),
        )
        .await
        .expect("synthesis failure must not abort");
        assert_eq!(output.answer, "answer to: anything");
        assert!(output.audio.is_none());
    }

    #[tokio::test]
    async fn test_stage_timeout_reads_as_stage_failure() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![]),
            Arc::new(SlowGenerator),
            false,
        );

        let mut opts = options();
        opts.stage_timeout = Duration::from_millis(50);

        let err = run_query(
            &engines,
            &session,
            QueryInput::Text("anything".to_string()),
            &opts,
        )
        .await
        .expect_err("timeout should abort the stage");
        assert_eq!(err.stage, PipelineStage::Generating);
        assert!(err.message.contains("timed out"));
    }

    #[tokio::test]
    async fn test_audio_language_follows_session_snapshot() {
        let session = session();
        session.set_language("hi");
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![]),
            Arc::new(EchoGenerator),
            false,
        );

        let output = run_query(
            &engines,
            &session,
            QueryInput::Text("namaste".to_string()),
            &options(),
        )
        .await
        .expect("pipeline should succeed");
        let audio = output.audio.expect("audio present");
        assert_eq!(audio.language, "hi");
        assert_eq!(audio.data, Bytes::from_static(b"hi"));
    }

    #[tokio::test]
    async fn test_history_and_user_name_are_recorded() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![]),
            Arc::new(EchoGenerator),
            false,
        );

        run_query(
            &engines,
            &session,
            QueryInput::Text("my name is asha".to_string()),
            &options(),
        )
        .await
        .expect("pipeline should succeed");

        assert_eq!(session.user_name(), Some("Asha".to_string()));
        let history = session.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, "my name is asha");
    }

    #[tokio::test]
    async fn test_artifact_sequence_counts_completions() {
        let session = session();
        let engines = engines(
            FixedTranscriber(Ok("unused")),
            FixedRetriever::ok(vec![]),
            Arc::new(EchoGenerator),
            false,
        );

        for expected_seq in 1..=3u64 {
            let output = run_query(
                &engines,
                &session,
                QueryInput::Text(format!("query {expected_seq}")),
                &options(),
            )
            .await
            .expect("pipeline should succeed");
            assert_eq!(output.audio.expect("audio").sequence, expected_seq);
        }
    }
}
