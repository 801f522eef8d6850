//! OpenAI speech synthesis client.
//!
//! Calls the `/v1/audio/speech` REST endpoint and returns the MP3 payload.
//! Markdown that reads badly aloud is stripped before the request, and the
//! session language is passed through as a speaking instruction.

use bytes::Bytes;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::{SynthesisError, SynthesisResult, Synthesizer, TtsConfig};
use crate::utils::text::{clean_for_speech, language_name};

#[derive(Debug, Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    voice: &'a str,
    input: &'a str,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

/// OpenAI speech REST provider.
pub struct OpenAiSynthesizer {
    config: TtsConfig,
    http_client: Client,
}

impl OpenAiSynthesizer {
    pub fn new(config: TtsConfig) -> SynthesisResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(SynthesisError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if config.voice.trim().is_empty() {
            return Err(SynthesisError::InvalidConfiguration(
                "voice is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            http_client: Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl Synthesizer for OpenAiSynthesizer {
    async fn synthesize(&self, text: &str, language: &str) -> SynthesisResult<Bytes> {
        let input = clean_for_speech(text);
        if input.is_empty() {
            return Err(SynthesisError::EmptyAudio(
                "nothing speakable left after cleanup".to_string(),
            ));
        }

        let request = SpeechRequest {
            model: &self.config.model,
            voice: &self.config.voice,
            input: &input,
            response_format: "mp3",
            instructions: Some(format!("Speak in {}.", language_name(language))),
        };

        debug!(model = %self.config.model, voice = %self.config.voice, chars = input.len(), "synthesizing speech");

        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SynthesisError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SynthesisError::ServiceError {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::RequestFailed(e.to_string()))?;

        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio(
                "service returned a zero-byte body".to_string(),
            ));
        }

        Ok(audio)
    }
}
