//! [`Embedder`] over an OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use serde::Deserialize;
use township_types::{Embedder, ServiceError};
use tracing::trace;

use crate::backend::send;
use crate::config::EmbeddingConfig;
use crate::error::LlmError;

const NAME: &str = "embeddings";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Remote embedding service.
#[derive(Debug)]
pub struct HttpEmbedder {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Create an embedder. `dimensions` of zero means "whatever the model
    /// returns"; otherwise every vector is checked against it.
    pub fn new(client: reqwest::Client, config: &EmbeddingConfig) -> Self {
        Self {
            client,
            api_url: config.api_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions.unwrap_or(0),
        }
    }

    async fn request(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let url = format!("{}/embeddings", self.api_url);
        let body = serde_json::json!({"model": self.model, "input": text});

        let mut request = self.client.post(&url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let json = send(NAME, request).await?;
        let response: EmbeddingResponse =
            serde_json::from_value(json).map_err(|e| LlmError::Response {
                backend: NAME,
                message: format!("unexpected embedding payload: {e}"),
            })?;

        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| LlmError::Response {
                backend: NAME,
                message: "missing data[0].embedding".to_owned(),
            })?;
        if self.dimensions != 0 && embedding.len() != self.dimensions {
            return Err(LlmError::Response {
                backend: NAME,
                message: format!(
                    "expected {} dimensions, got {}",
                    self.dimensions,
                    embedding.len()
                ),
            });
        }
        Ok(embedding)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ServiceError> {
        trace!(model = %self.model, chars = text.len(), "embedding");
        Ok(self.request(text).await?)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
