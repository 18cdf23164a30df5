/// Ollama embedding provider
///
/// Talks to a local Ollama server through `/api/embed`; the default model is
/// `all-minilm`, the sentence-transformers MiniLM the training graph is built with.
use async_trait::async_trait;
use clausegraph_core::{ClauseGraphError, EmbeddingConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::providers::{ensure_dimension, EmbeddingProvider, ProviderCharacteristics};

/// Configuration for Ollama embedding provider
#[derive(Debug, Clone)]
pub struct OllamaEmbeddingConfig {
    pub model_name: String,
    pub base_url: String,
    pub dimension: usize,
    pub timeout: Duration,
    pub batch_size: usize,
}

impl Default for OllamaEmbeddingConfig {
    fn default() -> Self {
        Self {
            model_name: "all-minilm".to_string(),
            base_url: "http://localhost:11434".to_string(),
            dimension: 384,
            timeout: Duration::from_secs(30),
            batch_size: 32,
        }
    }
}

impl From<&EmbeddingConfig> for OllamaEmbeddingConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            model_name: config.model.clone(),
            base_url: config.ollama_url.trim_end_matches('/').to_string(),
            dimension: config.dimension,
            timeout: Duration::from_secs(config.timeout_secs),
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

pub struct OllamaEmbeddingProvider {
    client: Client,
    config: OllamaEmbeddingConfig,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: OllamaEmbeddingConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn call_api(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = OllamaEmbeddingRequest {
            model: &self.config.model_name,
            input: texts,
            truncate: Some(true),
        };

        let start = Instant::now();
        let response = timeout(
            self.config.timeout,
            self.client
                .post(format!("{}/api/embed", self.config.base_url))
                .json(&request)
                .send(),
        )
        .await
        .map_err(|_| {
            ClauseGraphError::Timeout(format!(
                "Ollama embedding request timed out after {:?}",
                self.config.timeout
            ))
        })?
        .map_err(|e| ClauseGraphError::ExternalService(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClauseGraphError::ExternalService(format!(
                "Ollama embedding API error {}: {}",
                status, body
            )));
        }

        let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            ClauseGraphError::ExternalService(format!("Failed to parse Ollama response: {}", e))
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(ClauseGraphError::ExternalService(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }
        for embedding in &parsed.embeddings {
            ensure_dimension(self.config.dimension, embedding)?;
        }

        debug!(
            "Embedded {} texts with {} in {:?}",
            texts.len(),
            self.config.model_name,
            start.elapsed()
        );
        Ok(parsed.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.call_api(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| ClauseGraphError::ExternalService("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            out.extend(self.call_api(chunk).await?);
        }
        Ok(out)
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "ollama"
    }

    async fn is_available(&self) -> bool {
        let reachable = timeout(
            Duration::from_secs(5),
            self.client
                .get(format!("{}/api/tags", self.config.base_url))
                .send(),
        )
        .await
        .map(|r| r.map(|resp| resp.status().is_success()).unwrap_or(false))
        .unwrap_or(false);
        info!("Ollama embedding endpoint reachable: {}", reachable);
        reachable
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            typical_latency: Duration::from_millis(50),
            max_batch_size: self.config.batch_size,
            requires_network: false,
        }
    }
}
