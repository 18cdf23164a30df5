use async_trait::async_trait;
use clausegraph_core::{ClauseGraphError, EmbeddingConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::providers::{ensure_dimension, EmbeddingProvider, ProviderCharacteristics};

/// Configuration for any server exposing an OpenAI-style `/embeddings` route
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleEmbeddingConfig {
    /// Base URL including the version prefix
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
}

impl From<&EmbeddingConfig> for OpenAiCompatibleEmbeddingConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            api_base: config.openai_compatible_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

pub struct OpenAiCompatibleEmbeddingProvider {
    config: OpenAiCompatibleEmbeddingConfig,
    client: Client,
}

impl OpenAiCompatibleEmbeddingProvider {
    pub fn new(config: OpenAiCompatibleEmbeddingConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent("ClauseGraph/1.0")
            .build()
            .map_err(|e| ClauseGraphError::Configuration(e.to_string()))?;

        Ok(Self { config, client })
    }

    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            input: texts,
            model: &self.config.model,
            encoding_format: "float",
        };

        let mut builder = self
            .client
            .post(format!("{}/embeddings", self.config.api_base))
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = timeout(self.config.timeout, builder.send())
            .await
            .map_err(|_| {
                ClauseGraphError::Timeout(format!(
                    "embedding request timed out after {:?}",
                    self.config.timeout
                ))
            })?
            .map_err(|e| ClauseGraphError::ExternalService(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!("Embedding endpoint returned {}: {}", status, body);
            return Err(ClauseGraphError::ExternalService(format!(
                "embedding API error {}: {}",
                status, body
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ClauseGraphError::ExternalService(e.to_string()))?;

        if parsed.data.len() != texts.len() {
            return Err(ClauseGraphError::ExternalService(format!(
                "embedding API returned {} vectors for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }

        // Servers may answer out of order.
        parsed.data.sort_by_key(|d| d.index);
        let embeddings: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for embedding in &embeddings {
            ensure_dimension(self.config.dimension, embedding)?;
        }
        debug!("Embedded {} texts with {}", texts.len(), self.config.model);
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiCompatibleEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.call_api(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| ClauseGraphError::ExternalService("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(64) {
            out.extend(self.call_api(chunk).await?);
        }
        Ok(out)
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "openai-compatible"
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            typical_latency: Duration::from_millis(300),
            max_batch_size: 64,
            requires_network: true,
        }
    }
}
