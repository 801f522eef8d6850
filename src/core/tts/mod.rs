//! Speech synthesis collaborator seam.
//!
//! Synthesis is the one pipeline stage whose failure degrades rather than
//! aborts: callers fall back to a text-only response when a provider errors.

mod openai;

pub use openai::OpenAiSynthesizer;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during speech synthesis.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Invalid configuration
    #[error("Invalid TTS configuration: {0}")]
    InvalidConfiguration(String),

    /// The synthesis request could not be sent or completed
    #[error("Synthesis request failed: {0}")]
    RequestFailed(String),

    /// The synthesis service answered with an error status
    #[error("Synthesis service returned {status}: {message}")]
    ServiceError { status: u16, message: String },

    /// The service answered with an empty or unusable payload
    #[error("Synthesis produced no audio: {0}")]
    EmptyAudio(String),
}

/// Result type for synthesis operations.
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// Renders answer text as speech audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Produce audio for `text` spoken in `language`.
    async fn synthesize(&self, text: &str, language: &str) -> SynthesisResult<Bytes>;
}

/// Configuration shared by TTS providers.
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
    pub voice: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://api.openai.com/v1/audio/speech".to_string(),
            model: "gpt-4o-mini-tts".to_string(),
            voice: "alloy".to_string(),
        }
    }
}

/// Factory function to create a TTS provider by name.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI speech REST API (`/v1/audio/speech`)
pub fn create_synthesizer(
    provider: &str,
    config: TtsConfig,
) -> SynthesisResult<Arc<dyn Synthesizer>> {
    match provider.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(OpenAiSynthesizer::new(config)?)),
        _ => Err(SynthesisError::InvalidConfiguration(format!(
            "Unsupported TTS provider: {provider}. Supported providers: openai"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_synthesizer_openai() {
        let config = TtsConfig {
            api_key: "test-key".to_string(),
            ..Default::default()
        };
        assert!(create_synthesizer("openai", config).is_ok());
    }

    #[test]
    fn test_create_synthesizer_unknown_provider() {
        let result = create_synthesizer("gramophone", TtsConfig::default());
        match result {
            Err(SynthesisError::InvalidConfiguration(msg)) => {
                assert!(msg.contains("Unsupported TTS provider"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_create_synthesizer_requires_api_key() {
        assert!(create_synthesizer("openai", TtsConfig::default()).is_err());
    }
}
