//! Whisper-compatible transcription client.
//!
//! Talks to any endpoint implementing the OpenAI audio-transcription REST
//! contract: a multipart upload of the audio file plus the model name,
//! answered with `{"text": "..."}`.

use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::{SttConfig, Transcriber, TranscriptionError, TranscriptionResult};

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// Whisper REST transcription provider.
pub struct WhisperTranscriber {
    config: SttConfig,
    http_client: Client,
}

impl WhisperTranscriber {
    pub fn new(config: SttConfig) -> TranscriptionResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(TranscriptionError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        if config.api_url.trim().is_empty() {
            return Err(TranscriptionError::InvalidConfiguration(
                "API URL is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            http_client: Client::new(),
        })
    }
}

#[async_trait::async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Bytes) -> TranscriptionResult<String> {
        debug!(bytes = audio.len(), model = %self.config.model, "submitting audio for transcription");

        let part = Part::bytes(audio.to_vec())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::RequestFailed(e.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "json");

        let response = self
            .http_client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::ServiceError {
                status: status.as_u16(),
                message,
            });
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::MalformedResponse(e.to_string()))?;

        Ok(body.text.trim().to_string())
    }
}
