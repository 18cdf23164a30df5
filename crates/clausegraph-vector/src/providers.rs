use async_trait::async_trait;
use clausegraph_core::Result;
use std::sync::Arc;
use std::time::Duration;

/// Performance and capability characteristics of an embedding provider
#[derive(Debug, Clone)]
pub struct ProviderCharacteristics {
    pub typical_latency: Duration,
    pub max_batch_size: usize,
    pub requires_network: bool,
}

/// Unified trait for all clause embedding services.
///
/// Implementations must be deterministic: the same text always maps to the same vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single clause
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed several clauses, preserving input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    /// Fixed output dimension D for this deployment
    fn embedding_dimension(&self) -> usize;

    fn provider_name(&self) -> &str;

    async fn is_available(&self) -> bool {
        true
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            typical_latency: Duration::from_millis(100),
            max_batch_size: 32,
            requires_network: true,
        }
    }
}

#[async_trait]
impl<T: EmbeddingProvider + ?Sized> EmbeddingProvider for Arc<T> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        (**self).embed_batch(texts).await
    }

    fn embedding_dimension(&self) -> usize {
        (**self).embedding_dimension()
    }

    fn provider_name(&self) -> &str {
        (**self).provider_name()
    }

    async fn is_available(&self) -> bool {
        (**self).is_available().await
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        (**self).characteristics()
    }
}

/// Reject vectors whose length differs from the provider's declared dimension.
pub fn ensure_dimension(expected: usize, embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(crate::VectorError::EmptyVector.into());
    }
    if embedding.len() != expected {
        return Err(crate::VectorError::DimensionMismatch(expected, embedding.len()).into());
    }
    Ok(())
}
