//! Embedding provider abstraction.
//!
//! Defines the [`Embedder`] trait and [`OpenAIEmbedder`], which calls the
//! OpenAI `POST /v1/embeddings` endpoint. An embedder makes exactly one
//! remote attempt per call; retries with backoff are applied by the caller
//! ([`VectorIndexClient`](crate::vector_client::VectorIndexClient)) through
//! [`RetryPolicy`](crate::retry::RetryPolicy).
//!
//! # Error classification
//!
//! - HTTP 401/403 → [`PipelineError::Access`] (fatal)
//! - HTTP 429 and 5xx, network errors → retryable `EmbeddingService`
//! - other 4xx, malformed responses → non-retryable `EmbeddingService`

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::{EmbeddingConfig, OpenAiCredentials};
use crate::error::{PipelineError, Service};

/// Text used to discover the model's output dimension.
pub const PROBE_TEXT: &str = "Text";

/// A remote text-embedding model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-large"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts. Output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError>;
}

/// Embedding provider backed by the OpenAI embeddings API.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAIEmbedder {
    pub fn new(
        config: &EmbeddingConfig,
        credentials: OpenAiCredentials,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            api_key: credentials.api_key,
            model: config.model.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PipelineError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::from_transport(Service::Embedding, &e))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::from_status(
                Service::Embedding,
                status,
                &body_text,
            ));
        }

        let parsed: EmbeddingResponse = resp.json().await.map_err(|e| {
            PipelineError::service(
                Service::Embedding,
                format!("invalid embeddings response: {}", e),
                false,
            )
        })?;
        order_embeddings(parsed, texts.len())
    }
}

/// Reorder `data[]` by `index` and check one vector came back per input.
fn order_embeddings(
    response: EmbeddingResponse,
    expected: usize,
) -> Result<Vec<Vec<f32>>, PipelineError> {
    let mut items = response.data;
    if items.len() != expected {
        return Err(PipelineError::service(
            Service::Embedding,
            format!("expected {} embeddings, got {}", expected, items.len()),
            false,
        ));
    }
    items.sort_by_key(|item| item.index);
    Ok(items.into_iter().map(|item| item.embedding).collect())
}
