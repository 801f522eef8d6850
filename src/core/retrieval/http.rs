//! REST passage-store retrieval client.
//!
//! Queries `POST {base}/collections/{client_id}/query` with the normalized
//! query text and fan-out count; the store answers with an ordered passage
//! list. A collection that has never been ingested reads as empty rather
//! than failing the request.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Passage, RetrievalConfig, RetrievalError, RetrievalResult, Retriever};

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    passages: Vec<Passage>,
}

/// Passage-store REST retrieval provider.
pub struct HttpRetriever {
    config: RetrievalConfig,
    http_client: Client,
}

impl HttpRetriever {
    pub fn new(config: RetrievalConfig) -> RetrievalResult<Self> {
        if config.base_url.trim().is_empty() {
            return Err(RetrievalError::InvalidConfiguration(
                "retrieval store base URL is required".to_string(),
            ));
        }
        Ok(Self {
            config,
            http_client: Client::new(),
        })
    }

    fn query_url(&self, client_id: &str) -> String {
        format!(
            "{}/collections/{}/query",
            self.config.base_url.trim_end_matches('/'),
            client_id
        )
    }
}

#[async_trait::async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(
        &self,
        client_id: &str,
        query: &str,
        k: usize,
    ) -> RetrievalResult<Vec<Passage>> {
        let response = self
            .http_client
            .post(self.query_url(client_id))
            .json(&QueryRequest { query, top_k: k })
            .send()
            .await
            .map_err(|e| RetrievalError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // No collection ingested for this client yet.
            debug!(client_id, "retrieval collection not found, treating as empty");
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(RetrievalError::ServiceError {
                status: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::MalformedResponse(e.to_string()))?;

        debug!(client_id, passages = body.passages.len(), "retrieved context");
        Ok(body.passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_url_strips_trailing_slash() {
        let retriever = HttpRetriever::new(RetrievalConfig {
            base_url: "http://store:8001/".to_string(),
        })
        .expect("valid config");
        assert_eq!(
            retriever.query_url("client_demo"),
            "http://store:8001/collections/client_demo/query"
        );
    }
}
