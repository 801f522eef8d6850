//! Speech-to-text collaborator seam.
//!
//! The pipeline only depends on the [`Transcriber`] trait; concrete
//! providers live in submodules and are constructed through
//! [`create_transcriber`].

mod whisper;

pub use whisper::WhisperTranscriber;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during speech decoding.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    /// Invalid configuration
    #[error("Invalid STT configuration: {0}")]
    InvalidConfiguration(String),

    /// The transcription request could not be sent or completed
    #[error("Transcription request failed: {0}")]
    RequestFailed(String),

    /// The transcription service answered with an error status
    #[error("Transcription service returned {status}: {message}")]
    ServiceError { status: u16, message: String },

    /// The service answered with a body this client cannot interpret
    #[error("Malformed transcription response: {0}")]
    MalformedResponse(String),
}

/// Result type for transcription operations.
pub type TranscriptionResult<T> = Result<T, TranscriptionError>;

/// Decodes a spoken utterance to text.
///
/// An empty transcript is a valid outcome for silent or unintelligible
/// audio; providers must reserve errors for genuine failures.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio: Bytes) -> TranscriptionResult<String>;
}

/// Configuration shared by STT providers.
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            model: "whisper-1".to_string(),
        }
    }
}

/// Factory function to create an STT provider by name.
///
/// # Supported Providers
///
/// - `"whisper"` or `"openai"` - Whisper-compatible transcription REST API
pub fn create_transcriber(
    provider: &str,
    config: SttConfig,
) -> TranscriptionResult<Arc<dyn Transcriber>> {
    match provider.to_lowercase().as_str() {
        "whisper" | "openai" => Ok(Arc::new(WhisperTranscriber::new(config)?)),
        _ => Err(TranscriptionError::InvalidConfiguration(format!(
            "Unsupported STT provider: {provider}. Supported providers: whisper"
        ))),
    }
}
