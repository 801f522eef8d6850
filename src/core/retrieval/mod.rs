//! Context retrieval collaborator seam.
//!
//! The retrieval store holds one passage collection per client identifier;
//! ingestion happens out-of-band. The pipeline queries it through the
//! [`Retriever`] trait and treats an empty result as a normal outcome.

mod http;

pub use http::HttpRetriever;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// One retrieved context passage.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Passage {
    pub text: String,
    /// Similarity score as reported by the store, when available.
    #[serde(default)]
    pub score: Option<f32>,
}

/// Errors that can occur during context retrieval.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Invalid configuration
    #[error("Invalid retrieval configuration: {0}")]
    InvalidConfiguration(String),

    /// The retrieval request could not be sent or completed
    #[error("Retrieval request failed: {0}")]
    RequestFailed(String),

    /// The retrieval store answered with an error status
    #[error("Retrieval store returned {status}: {message}")]
    ServiceError { status: u16, message: String },

    /// The store answered with a body this client cannot interpret
    #[error("Malformed retrieval response: {0}")]
    MalformedResponse(String),
}

/// Result type for retrieval operations.
pub type RetrievalResult<T> = Result<T, RetrievalError>;

/// Fetches the passages most relevant to a query from a client's collection.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Returns up to `k` passages, best match first. Empty is valid.
    async fn retrieve(
        &self,
        client_id: &str,
        query: &str,
        k: usize,
    ) -> RetrievalResult<Vec<Passage>>;
}

/// Configuration shared by retrieval providers.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    /// Base URL of the retrieval store.
    pub base_url: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
        }
    }
}

/// Factory function to create a retrieval provider by name.
///
/// # Supported Providers
///
/// - `"http"` or `"rest"` - passage-store REST API with per-client collections
pub fn create_retriever(
    provider: &str,
    config: RetrievalConfig,
) -> RetrievalResult<Arc<dyn Retriever>> {
    match provider.to_lowercase().as_str() {
        "http" | "rest" => Ok(Arc::new(HttpRetriever::new(config)?)),
        _ => Err(RetrievalError::InvalidConfiguration(format!(
            "Unsupported retrieval provider: {provider}. Supported providers: http"
        ))),
    }
}
