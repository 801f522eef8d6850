//! Gemini `generateContent` client.
//!
//! Builds a grounded prompt from the retrieved passages, the session's
//! language and persona, and the recent conversation, then calls the
//! Gemini REST API.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{AnswerRequest, GenerationError, GenerationResult, Generator, LlmConfig};
use crate::utils::text::language_name;

/// Standing instructions for the assistant persona.
const SYSTEM_PREAMBLE: &str = "You are \"Voice\", a professional assistant. \
Answer the user's question accurately based only on the provided context information. \
If the context does not contain the information needed, say that you cannot find \
the specific details in the available documents. Do not make up information.";

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

/// Gemini REST generation provider.
pub struct GeminiGenerator {
    config: LlmConfig,
    http_client: Client,
}

impl GeminiGenerator {
    pub fn new(config: LlmConfig) -> GenerationResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(GenerationError::InvalidConfiguration(
                "API key is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            http_client: Client::new(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Assemble the single-turn prompt sent to the model.
fn build_prompt(request: &AnswerRequest<'_>) -> String {
    let mut prompt = String::from(SYSTEM_PREAMBLE);

    prompt.push_str(&format!(
        "\nRespond entirely in {}. Do not switch languages unless asked.",
        language_name(request.language)
    ));
    if let Some(name) = request.user_name {
        prompt.push_str(&format!(
            "\nThe user's name is {name}; address them by name where appropriate."
        ));
    }

    prompt.push_str("\n\nContext information:\n");
    if request.passages.is_empty() {
        prompt.push_str("(no matching documents)\n");
    } else {
        for passage in request.passages {
            prompt.push_str(&passage.text);
            prompt.push_str("\n\n");
        }
    }

    if !request.history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for (question, answer) in request.history {
            prompt.push_str(&format!("User: {question}\nAssistant: {answer}\n"));
        }
    }

    prompt.push_str(&format!("\nQuestion: {}", request.query));
    prompt
}

#[async_trait::async_trait]
impl Generator for GeminiGenerator {
    async fn generate(&self, request: AnswerRequest<'_>) -> GenerationResult<String> {
        let prompt = build_prompt(&request);
        debug!(model = %self.config.model, prompt_len = prompt.len(), "requesting answer");

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![TextPart { text: prompt }],
            }],
        };

        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(GenerationError::ServiceError {
                status: status.as_u16(),
                message,
            });
        }

        let body: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| GenerationError::MalformedResponse(e.to_string()))?;

        let answer = body
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if answer.trim().is_empty() {
            return Err(GenerationError::MalformedResponse(
                "response carried no candidate text".to_string(),
            ));
        }

        Ok(answer.trim().to_string())
    }
}
