//! Answer generation collaborator seam.

mod gemini;

pub use gemini::GeminiGenerator;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::retrieval::Passage;

/// Errors that can occur during answer generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Invalid configuration
    #[error("Invalid generation configuration: {0}")]
    InvalidConfiguration(String),

    /// The generation request could not be sent or completed
    #[error("Generation request failed: {0}")]
    RequestFailed(String),

    /// The language model service answered with an error status
    #[error("Generation service returned {status}: {message}")]
    ServiceError { status: u16, message: String },

    /// The service answered with a body this client cannot interpret
    #[error("Malformed generation response: {0}")]
    MalformedResponse(String),
}

/// Result type for generation operations.
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Everything the model needs to answer one query.
///
/// Passages are borrowed immutably; generation never mutates the retrieved
/// context.
#[derive(Debug)]
pub struct AnswerRequest<'a> {
    pub query: &'a str,
    pub passages: &'a [Passage],
    /// Language tag the answer must be written in.
    pub language: &'a str,
    /// User name for personalization, when the user introduced themselves.
    pub user_name: Option<&'a str>,
    /// Recent (query, answer) turns, oldest first.
    pub history: &'a [(String, String)],
}

/// Produces the assistant's answer text for one query.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: AnswerRequest<'_>) -> GenerationResult<String>;
}

/// Configuration shared by generation providers.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub api_url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash-lite".to_string(),
        }
    }
}

/// Factory function to create a generation provider by name.
///
/// # Supported Providers
///
/// - `"gemini"` or `"google"` - Gemini `generateContent` REST API
pub fn create_generator(provider: &str, config: LlmConfig) -> GenerationResult<Arc<dyn Generator>> {
    match provider.to_lowercase().as_str() {
        "gemini" | "google" => Ok(Arc::new(GeminiGenerator::new(config)?)),
        _ => Err(GenerationError::InvalidConfiguration(format!(
            "Unsupported generation provider: {provider}. Supported providers: gemini"
        ))),
    }
}
